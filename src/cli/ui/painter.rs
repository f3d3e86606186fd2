use owo_colors::{OwoColorize, Style as OwoStyle};

use crate::utils::format_rssi;

/// Weakest RSSI still shown as a healthy link.
const STRONG_SIGNAL_DBM: i16 = -60;
/// RSSI below which links tend to drop.
const WEAK_SIGNAL_DBM: i16 = -80;

/// Styles terminal output, or passes it through when colour is off.
#[derive(Debug)]
pub(crate) struct Painter {
    use_colour: bool,
}

impl Painter {
    pub(crate) fn new(use_colour: bool) -> Self {
        Self { use_colour }
    }

    pub(crate) fn heading<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold().cyan())
    }

    pub(crate) fn success<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold().green())
    }

    pub(crate) fn warning<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold().yellow())
    }

    pub(crate) fn muted<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().dimmed())
    }

    pub(crate) fn value<T: AsRef<str>>(&self, text: T) -> String {
        self.paint(text.as_ref(), OwoStyle::new().bold())
    }

    /// Renders an RSSI reading coloured by link quality.
    pub(crate) fn signal(&self, rssi: Option<i16>) -> String {
        let text = format_rssi(rssi);
        match rssi {
            None => self.muted(text),
            Some(dbm) if dbm >= STRONG_SIGNAL_DBM => self.success(text),
            Some(dbm) if dbm < WEAK_SIGNAL_DBM => self.warning(text),
            Some(_) => self.value(text),
        }
    }

    fn paint(&self, text: &str, style: OwoStyle) -> String {
        if self.use_colour {
            format!("{}", text.style(style))
        } else {
            text.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::strong(Some(-48), "-48 dBm")]
    #[case::fair(Some(-70), "-70 dBm")]
    #[case::weak(Some(-91), "-91 dBm")]
    #[case::unknown(None, "-")]
    fn plain_signal_is_unstyled(#[case] rssi: Option<i16>, #[case] expected: &str) {
        assert_eq!(expected, Painter::new(false).signal(rssi));
    }

    #[test]
    fn signal_colour_tracks_link_quality() {
        let painter = Painter::new(true);

        assert_eq!(painter.success("-48 dBm"), painter.signal(Some(-48)));
        assert_eq!(painter.value("-70 dBm"), painter.signal(Some(-70)));
        assert_eq!(painter.warning("-91 dBm"), painter.signal(Some(-91)));
        assert_eq!(painter.muted("-"), painter.signal(None));
    }

    #[test]
    fn colour_wraps_but_keeps_text() {
        let painter = Painter::new(true);

        for styled in [painter.heading("Pump-01"), painter.muted("Pump-01")] {
            assert_ne!("Pump-01", styled);
            assert!(styled.contains("Pump-01"));
        }
    }
}
