/// Group numeric digits to facilitate reading long numbers
pub fn group_digits<F: std::fmt::Display>(n: F) -> String {
    use numsep::{separate, Locale};
    separate(n, Locale::English)
}

/// Parse a quantity written with a unit suffix, such as `"8 A"` or
/// `"60 deg"`, returning its value in the units of the first entry of
/// `units` whose suffix matches.
pub fn parse_with_unit(s: &str, units: &[(&str, f64)]) -> Result<f64, String> {
    let s = s.trim();
    let split = s.find(|c: char| !(c.is_ascii_digit() || "+-.eE".contains(c)))
                 .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let value: f64 = number.trim().parse()
        .map_err(|e| format!("could not parse number in `{s}`: {e}"))?;
    let unit = unit.trim();
    units.iter()
        .find(|(name, _)| *name == unit)
        .map(|(_, factor)| value * factor)
        .ok_or_else(|| {
            let known: Vec<_> = units.iter().map(|(name, _)| *name).collect();
            format!("unknown unit `{unit}` in `{s}`; expected one of {known:?}")
        })
}

pub mod timing {

    use super::group_digits;
    use std::time::Instant;
    use tracing::info;

    /// Report stages of a long computation, with the time each one took.
    pub struct Progress {
        previous: Instant,
        message: String,
    }

    impl Progress {

        #[allow(clippy::new_without_default)]
        pub fn new() -> Self { Self { previous: Instant::now(), message: String::new() } }

        /// Announce the start of a stage, start timer.
        pub fn start(&mut self, message: &str) {
            info!("{message} ...");
            self.message = message.into();
            self.start_timer();
        }

        // Report time elapsed since last start or done
        pub fn done(&mut self) {
            info!("{} done: {} ms", self.message, group_digits(self.previous.elapsed().as_millis()));
            self.start_timer();
        }

        // Report message followed by time elapsed since last start or done
        pub fn done_with_message(&mut self, message: &str) {
            info!("{message}: {} ms", group_digits(self.previous.elapsed().as_millis()));
            self.start_timer();
        }

        fn start_timer(&mut self) { self.previous = Instant::now() }
    }
}
