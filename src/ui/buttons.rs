use serenity::{
    all::ButtonStyle,
    builder::{CreateActionRow, CreateButton},
};

/// IDs personalizados para los botones
pub mod button_ids {
    pub const PREVIOUS: &str = "music_previous";
    pub const PAUSE: &str = "music_pause";
    pub const SKIP: &str = "music_skip";
    pub const SHUFFLE: &str = "music_shuffle";
    pub const STOP: &str = "music_stop";
}

/// Transport control attached to a now-playing card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    Previous,
    PauseToggle,
    Skip,
    Shuffle,
    Stop,
}

impl ButtonAction {
    pub const ALL: [ButtonAction; 5] = [
        Self::Previous,
        Self::PauseToggle,
        Self::Skip,
        Self::Shuffle,
        Self::Stop,
    ];

    pub fn custom_id(self) -> &'static str {
        match self {
            Self::Previous => button_ids::PREVIOUS,
            Self::PauseToggle => button_ids::PAUSE,
            Self::Skip => button_ids::SKIP,
            Self::Shuffle => button_ids::SHUFFLE,
            Self::Stop => button_ids::STOP,
        }
    }

    pub fn from_custom_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.custom_id() == id)
    }
}

/// Fila de controles del reproductor.
///
/// "Previous" is disabled while the guild has no history; the pause button
/// flips between pause and resume.
pub fn player_controls(has_previous: bool, paused: bool) -> CreateActionRow {
    let (pause_label, pause_emoji) = if paused {
        ("Resume", '▶')
    } else {
        ("Pause", '⏸')
    };

    CreateActionRow::Buttons(vec![
        CreateButton::new(button_ids::PREVIOUS)
            .label("Previous")
            .emoji('⏮')
            .style(ButtonStyle::Secondary)
            .disabled(!has_previous),
        CreateButton::new(button_ids::PAUSE)
            .label(pause_label)
            .emoji(pause_emoji)
            .style(ButtonStyle::Primary),
        CreateButton::new(button_ids::SKIP)
            .label("Skip")
            .emoji('⏭')
            .style(ButtonStyle::Secondary),
        CreateButton::new(button_ids::SHUFFLE)
            .label("Shuffle")
            .emoji('🔀')
            .style(ButtonStyle::Secondary),
        CreateButton::new(button_ids::STOP)
            .label("Stop")
            .emoji('⏹')
            .style(ButtonStyle::Danger),
    ])
}
