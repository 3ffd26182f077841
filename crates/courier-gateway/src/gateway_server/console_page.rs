//! Single-page web console for starting and watching dispatch runs.
use super::*;

pub(super) fn render_console_page() -> String {
    format!(
        r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>Courier Mass DM Console</title>
  <style>
    :root {{
      color-scheme: dark;
      font-family: "IBM Plex Sans", "Segoe UI", sans-serif;
    }}
    body {{
      margin: 0;
      background: #1e1f22;
      color: #dbdee1;
    }}
    .container {{
      max-width: 860px;
      margin: 0 auto;
      padding: 1.5rem;
    }}
    h1 {{
      margin: 0 0 0.25rem 0;
      font-size: 1.5rem;
    }}
    .panel {{
      background: #2b2d31;
      border-radius: 8px;
      padding: 1rem;
      margin-bottom: 1rem;
    }}
    label {{
      display: block;
      margin: 0.6rem 0 0.25rem 0;
      font-weight: 600;
    }}
    textarea, input, select {{
      width: 100%;
      box-sizing: border-box;
      background: #1e1f22;
      color: #dbdee1;
      border: 1px solid #3f4147;
      border-radius: 6px;
      padding: 0.5rem;
    }}
    textarea {{
      min-height: 140px;
    }}
    .actions {{
      display: flex;
      gap: 0.5rem;
      margin-top: 0.9rem;
    }}
    button {{
      border: 0;
      border-radius: 6px;
      padding: 0.55rem 1rem;
      color: #fff;
      cursor: pointer;
    }}
    #start {{ background: #5865f2; }}
    #stop {{ background: #da373c; }}
    .bar {{
      height: 14px;
      background: #1e1f22;
      border-radius: 7px;
      overflow: hidden;
    }}
    .bar > div {{
      height: 100%;
      width: 0%;
      background: #3498db;
      transition: width 0.2s;
    }}
    .counters {{
      display: grid;
      grid-template-columns: repeat(4, 1fr);
      gap: 0.5rem;
      margin-top: 0.75rem;
      text-align: center;
    }}
    .counters strong {{
      display: block;
      font-size: 1.4rem;
    }}
    #log {{
      max-height: 280px;
      overflow-y: auto;
      white-space: pre-wrap;
      font-family: "IBM Plex Mono", monospace;
      font-size: 0.85rem;
    }}
    .warn {{ color: #f0b232; }}
    .error {{ color: #f23f43; }}
  </style>
</head>
<body>
  <div class="container">
    <h1>Courier Mass DM Console</h1>
    <p id="group">Loading server...</p>
    <div class="panel">
      <label for="message">Message (use &lt;user&gt; to mention each recipient)</label>
      <textarea id="message" maxlength="2000"></textarea>
      <label for="mode">Recipients</label>
      <select id="mode">
        <option value="all">All members</option>
        <option value="roles">Specific roles</option>
      </select>
      <label for="roles">Roles</label>
      <select id="roles" multiple size="6" disabled></select>
      <label for="delay">Delay between DMs (0.5-30 seconds)</label>
      <input id="delay" type="number" min="0.5" max="30" step="0.5" value="2" />
      <label for="session">Session</label>
      <input id="session" value="{default_session}" />
      <div class="actions">
        <button id="start" type="button">Start</button>
        <button id="stop" type="button">Stop</button>
      </div>
    </div>
    <div class="panel">
      <div class="bar"><div id="bar"></div></div>
      <div id="percent">0% (0/0)</div>
      <div class="counters">
        <div><strong id="sent">0</strong>Sent</div>
        <div><strong id="failed">0</strong>Failed</div>
        <div><strong id="closed">0</strong>DM Closed</div>
        <div><strong id="total">0</strong>Total</div>
      </div>
    </div>
    <div class="panel"><div id="log"></div></div>
  </div>
  <script>
    const GROUP_ENDPOINT = "{group_endpoint}";
    const ROLES_ENDPOINT = "{roles_endpoint}";
    const DISPATCH_ENDPOINT = "{dispatch_endpoint}";
    const STOP_ENDPOINT = "{stop_endpoint}";
    const logDiv = document.getElementById("log");
    const modeSelect = document.getElementById("mode");
    const rolesSelect = document.getElementById("roles");

    function appendLog(text, level) {{
      const line = document.createElement("div");
      line.textContent = text;
      if (level) {{
        line.className = level;
      }}
      logDiv.appendChild(line);
      logDiv.scrollTop = logDiv.scrollHeight;
    }}

    function renderSnapshot(snapshot) {{
      const processed = snapshot.sent + snapshot.failed + snapshot.dm_closed;
      const pct = snapshot.total > 0 ? Math.floor((processed * 100) / snapshot.total) : 0;
      document.getElementById("bar").style.width = pct + "%";
      document.getElementById("percent").textContent = pct + "% (" + processed + "/" + snapshot.total + ")";
      document.getElementById("sent").textContent = snapshot.sent;
      document.getElementById("failed").textContent = snapshot.failed;
      document.getElementById("closed").textContent = snapshot.dm_closed;
      document.getElementById("total").textContent = snapshot.total;
    }}

    function processSseFrame(frame) {{
      let eventName = "";
      let data = "";
      for (const line of frame.split(/\r?\n/)) {{
        if (line.startsWith("event:")) {{
          eventName = line.slice("event:".length).trim();
        }} else if (line.startsWith("data:")) {{
          data += line.slice("data:".length).trim();
        }}
      }}
      if (data.length === 0 || data === "[DONE]") {{
        return;
      }}
      const payload = JSON.parse(data);
      if (eventName === "log") {{
        appendLog(payload.text, payload.level);
      }} else if (eventName === "progress") {{
        renderSnapshot(payload.snapshot);
      }} else if (eventName === "complete") {{
        renderSnapshot(payload.snapshot);
        appendLog("Finished: " + payload.snapshot.status);
      }} else if (eventName === "error") {{
        appendLog(payload.text, "error");
      }}
    }}

    async function readSseBody(response) {{
      const reader = response.body.getReader();
      const decoder = new TextDecoder();
      let buffer = "";
      while (true) {{
        const result = await reader.read();
        if (result.done) {{
          break;
        }}
        buffer += decoder.decode(result.value, {{ stream: true }});
        let splitIndex = buffer.indexOf("\n\n");
        while (splitIndex >= 0) {{
          processSseFrame(buffer.slice(0, splitIndex));
          buffer = buffer.slice(splitIndex + 2);
          splitIndex = buffer.indexOf("\n\n");
        }}
      }}
      if (buffer.trim().length > 0) {{
        processSseFrame(buffer);
      }}
    }}

    async function startDispatch() {{
      logDiv.textContent = "";
      const body = {{
        session_id: document.getElementById("session").value,
        message: document.getElementById("message").value,
        mode: modeSelect.value,
        role_ids: Array.from(rolesSelect.selectedOptions).map((option) => option.value),
        delay: document.getElementById("delay").value,
      }};
      const response = await fetch(DISPATCH_ENDPOINT, {{
        method: "POST",
        headers: {{ "Content-Type": "application/json" }},
        body: JSON.stringify(body),
      }});
      if (!response.ok) {{
        const payload = await response.json();
        appendLog(payload.error ? payload.error.message : "request failed", "error");
        return;
      }}
      await readSseBody(response);
    }}

    async function stopDispatch() {{
      const response = await fetch(STOP_ENDPOINT, {{
        method: "POST",
        headers: {{ "Content-Type": "application/json" }},
        body: JSON.stringify({{ session_id: document.getElementById("session").value }}),
      }});
      const payload = await response.json();
      appendLog(payload.stopped ? "Stopping..." : "No active session.", "warn");
    }}

    async function loadGroup() {{
      const groupResponse = await fetch(GROUP_ENDPOINT);
      if (groupResponse.ok) {{
        const payload = await groupResponse.json();
        const members = payload.group.member_count === null ? "unknown" : payload.group.member_count;
        document.getElementById("group").textContent = payload.group.name + " - " + members + " members";
      }}
      const rolesResponse = await fetch(ROLES_ENDPOINT);
      if (rolesResponse.ok) {{
        const payload = await rolesResponse.json();
        for (const role of payload.roles) {{
          const option = document.createElement("option");
          option.value = role.id;
          option.textContent = role.name;
          rolesSelect.appendChild(option);
        }}
      }}
    }}

    modeSelect.addEventListener("change", () => {{
      rolesSelect.disabled = modeSelect.value !== "roles";
    }});
    document.getElementById("start").addEventListener("click", startDispatch);
    document.getElementById("stop").addEventListener("click", stopDispatch);
    loadGroup();
  </script>
</body>
</html>
"#,
        default_session = DEFAULT_CONSOLE_SESSION_ID,
        group_endpoint = CONSOLE_GROUP_ENDPOINT,
        roles_endpoint = CONSOLE_ROLES_ENDPOINT,
        dispatch_endpoint = CONSOLE_DISPATCH_ENDPOINT,
        stop_endpoint = CONSOLE_STOP_ENDPOINT,
    )
}
