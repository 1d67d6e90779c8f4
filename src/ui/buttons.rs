use serenity::{
    all::ButtonStyle,
    builder::{CreateActionRow, CreateButton},
};

use crate::audio::LoopMode;

/// IDs personalizados para los botones
pub mod button_ids {
    pub const PREVIOUS: &str = "music_previous";
    pub const PAUSE_RESUME: &str = "music_pause_resume";
    pub const SKIP: &str = "music_skip";
    pub const STOP: &str = "music_stop";
    pub const LOOP: &str = "music_loop";
}

/// Acción asociada a un botón del reproductor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    Previous,
    PauseResume,
    Skip,
    Stop,
    Loop,
}

impl ButtonAction {
    pub fn from_custom_id(custom_id: &str) -> Option<Self> {
        match custom_id {
            button_ids::PREVIOUS => Some(Self::Previous),
            button_ids::PAUSE_RESUME => Some(Self::PauseResume),
            button_ids::SKIP => Some(Self::Skip),
            button_ids::STOP => Some(Self::Stop),
            button_ids::LOOP => Some(Self::Loop),
            _ => None,
        }
    }
}

/// Crea los controles del reproductor
pub fn player_controls(is_paused: bool, loop_mode: LoopMode) -> Vec<CreateActionRow> {
    let pause_resume_emoji = if is_paused { '▶' } else { '⏸' };
    let loop_style = match loop_mode {
        LoopMode::Off => ButtonStyle::Secondary,
        LoopMode::Track | LoopMode::Queue => ButtonStyle::Success,
    };

    let previous_btn = CreateButton::new(button_ids::PREVIOUS)
        .emoji('⏮')
        .style(ButtonStyle::Secondary);

    let pause_resume_btn = CreateButton::new(button_ids::PAUSE_RESUME)
        .emoji(pause_resume_emoji)
        .style(ButtonStyle::Primary);

    let skip_btn = CreateButton::new(button_ids::SKIP)
        .emoji('⏭')
        .style(ButtonStyle::Secondary);

    let stop_btn = CreateButton::new(button_ids::STOP)
        .emoji('⏹')
        .style(ButtonStyle::Danger);

    let loop_btn = CreateButton::new(button_ids::LOOP)
        .emoji('🔁')
        .style(loop_style);

    vec![CreateActionRow::Buttons(vec![
        previous_btn,
        pause_resume_btn,
        skip_btn,
        stop_btn,
        loop_btn,
    ])]
}
