use serde::{Deserialize, Serialize};

/// How much room the focused side panel gets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenMode {
    #[default]
    Normal,
    Half,
    Full,
}

impl ScreenMode {
    pub fn next(self) -> Self {
        match self {
            ScreenMode::Normal => ScreenMode::Half,
            ScreenMode::Half => ScreenMode::Full,
            ScreenMode::Full => ScreenMode::Normal,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            ScreenMode::Normal => ScreenMode::Full,
            ScreenMode::Half => ScreenMode::Normal,
            ScreenMode::Full => ScreenMode::Half,
        }
    }

    /// Percentage of the width given to the side panels.
    pub fn side_width_percent(self) -> u16 {
        match self {
            ScreenMode::Normal => 33,
            ScreenMode::Half => 50,
            ScreenMode::Full => 100,
        }
    }
}

/// Lets the first load be split into a fast part and the rest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum StartupStage {
    #[default]
    Initial,
    Complete,
}

impl StartupStage {
    /// Move to `to` unless that would go backwards.
    pub fn advance(&mut self, to: StartupStage) {
        if to > *self {
            *self = to;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn screen_mode_cycles_both_ways() {
        let mut mode = ScreenMode::Normal;
        for _ in 0..3 {
            mode = mode.next();
        }
        assert_eq!(mode, ScreenMode::Normal);
        assert_eq!(ScreenMode::Normal.prev(), ScreenMode::Full);
        assert_eq!(ScreenMode::Half.next().prev(), ScreenMode::Half);
    }

    #[test]
    fn startup_stage_never_goes_back() {
        let mut stage = StartupStage::Initial;
        stage.advance(StartupStage::Complete);
        stage.advance(StartupStage::Initial);
        assert_eq!(stage, StartupStage::Complete);
    }
}
