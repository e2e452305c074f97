pub mod door_panel;
pub mod pin_prompt;

pub use door_panel::{lit_doors, DoorPanel, LogDisplay};
pub use pin_prompt::{check_pin, prompt_for_pin};
