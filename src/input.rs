use log::debug;

/// Longest count prefix accepted; further digits are ignored.
const MAX_COUNT_DIGITS: usize = 6;

/// Match navigation requested from the keyboard or the toolbar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationCommand {
    Next(usize),
    Previous(usize),
    First,
    Last,
}

impl NavigationCommand {
    /// Signed pointer delta for relative moves.
    pub fn delta(&self) -> Option<isize> {
        match self {
            NavigationCommand::Next(count) => Some(isize::try_from(*count).unwrap_or(isize::MAX)),
            NavigationCommand::Previous(count) => Some(-isize::try_from(*count).unwrap_or(isize::MAX)),
            NavigationCommand::First | NavigationCommand::Last => None,
        }
    }
}

/// Keys the chord parser understands, independent of the UI toolkit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavKey {
    Digit(u8),
    /// `n`
    Next,
    /// `N`
    Previous,
    /// `g`
    G,
    /// `G`
    ShiftG,
    Escape,
}

/// Builds vim-style commands out of single key presses: `n`, `N`, `3n`,
/// `gg`, `G`.
#[derive(Debug, Default)]
pub struct ChordParser {
    count: String,
    pending_g: bool,
}

impl ChordParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, key: NavKey) -> Option<NavigationCommand> {
        match key {
            NavKey::Digit(digit) => {
                // No leading zeros
                if digit <= 9
                    && !(self.count.is_empty() && digit == 0)
                    && self.count.len() < MAX_COUNT_DIGITS
                {
                    self.count.push(char::from(b'0' + digit));
                }
                self.pending_g = false;
                None
            }
            NavKey::Next => {
                let count = self.take_count();
                Some(NavigationCommand::Next(count))
            }
            NavKey::Previous => {
                let count = self.take_count();
                Some(NavigationCommand::Previous(count))
            }
            NavKey::G if self.pending_g => {
                self.reset();
                Some(NavigationCommand::First)
            }
            NavKey::G => {
                self.count.clear();
                self.pending_g = true;
                None
            }
            NavKey::ShiftG => {
                self.reset();
                Some(NavigationCommand::Last)
            }
            NavKey::Escape => {
                if self.is_pending() {
                    debug!("Cancelled pending command '{}'", self.status());
                }
                self.reset();
                None
            }
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self.count.parse::<usize>().unwrap_or(1).max(1);
        self.reset();
        count
    }

    fn reset(&mut self) {
        self.count.clear();
        self.pending_g = false;
    }

    pub fn is_pending(&self) -> bool {
        !self.count.is_empty() || self.pending_g
    }

    /// Partially typed command for the status bar, e.g. "3" or "g".
    pub fn status(&self) -> String {
        let mut status = self.count.clone();
        if self.pending_g {
            status.push('g');
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_keys() {
        let mut parser = ChordParser::new();
        assert_eq!(parser.feed(NavKey::Next), Some(NavigationCommand::Next(1)));
        assert_eq!(parser.feed(NavKey::Previous), Some(NavigationCommand::Previous(1)));
        assert_eq!(parser.feed(NavKey::ShiftG), Some(NavigationCommand::Last));
    }

    #[test]
    fn test_count_prefix() {
        let mut parser = ChordParser::new();
        assert_eq!(parser.feed(NavKey::Digit(1)), None);
        assert_eq!(parser.feed(NavKey::Digit(2)), None);
        assert_eq!(parser.status(), "12");
        assert_eq!(parser.feed(NavKey::Next), Some(NavigationCommand::Next(12)));
        assert!(!parser.is_pending());
    }

    #[test]
    fn test_leading_zero_ignored() {
        let mut parser = ChordParser::new();
        parser.feed(NavKey::Digit(0));
        assert!(!parser.is_pending());
        assert_eq!(parser.feed(NavKey::Previous), Some(NavigationCommand::Previous(1)));
    }

    #[test]
    fn test_gg_goes_to_first() {
        let mut parser = ChordParser::new();
        assert_eq!(parser.feed(NavKey::G), None);
        assert_eq!(parser.status(), "g");
        assert_eq!(parser.feed(NavKey::G), Some(NavigationCommand::First));
    }

    #[test]
    fn test_escape_cancels() {
        let mut parser = ChordParser::new();
        parser.feed(NavKey::Digit(4));
        parser.feed(NavKey::Escape);
        assert_eq!(parser.feed(NavKey::Next), Some(NavigationCommand::Next(1)));

        parser.feed(NavKey::G);
        parser.feed(NavKey::Escape);
        assert_eq!(parser.feed(NavKey::G), None);
    }

    #[test]
    fn test_long_count_is_capped() {
        let mut parser = ChordParser::new();
        for _ in 0..30 {
            parser.feed(NavKey::Digit(9));
        }
        assert_eq!(parser.status(), "999999");
        assert_eq!(parser.feed(NavKey::Next), Some(NavigationCommand::Next(999_999)));
    }

    #[test]
    fn test_delta() {
        assert_eq!(NavigationCommand::Next(3).delta(), Some(3));
        assert_eq!(NavigationCommand::Previous(2).delta(), Some(-2));
        assert_eq!(NavigationCommand::First.delta(), None);
    }

    #[test]
    fn test_delta_saturates_instead_of_flipping_sign() {
        assert_eq!(NavigationCommand::Next(usize::MAX).delta(), Some(isize::MAX));
        assert_eq!(NavigationCommand::Previous(usize::MAX).delta(), Some(-isize::MAX));
    }
}
