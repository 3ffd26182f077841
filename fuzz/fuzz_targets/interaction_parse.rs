#![no_main]

use courier_discord::{parse_interaction, InteractionKind, DELAY_INPUT_ID, MESSAGE_INPUT_ID};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let Ok(interaction) = parse_interaction(&raw) else {
        return;
    };

    if let InteractionKind::Other(code) = interaction.kind() {
        assert!(!matches!(code, 1 | 2 | 3 | 5));
    }
    assert!(!interaction.invoker_display_name().is_empty());
    let _ = interaction.is_administrator();
    let _ = interaction.command_name();
    let _ = interaction.custom_id();
    let _ = interaction.selected_values().len();
    let _ = interaction.modal_value(MESSAGE_INPUT_ID);
    let _ = interaction.modal_value(DELAY_INPUT_ID);
});
