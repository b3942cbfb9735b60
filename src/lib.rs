//! # avg_q client for Rust
//!
//! Drives the avg_q signal-processing engine through its script language.
//! The engine runs as a child process; this library composes scripts,
//! streams trigger points and sample frames to it and parses the answers.
//!
//! ## Quick Start
//!
//! ### Querying a data file
//!
//! ```rust
//! use avgq::{AvgQFile, Result};
//!
//! fn main() -> Result<()> {
//!     # let mut avgq = avgq::doctest_utils::scripted_session(&["sfreq=500", "points_in_file=360000"]);
//!     // Start the engine (`AVG_Q` selects the executable)
//!     // let mut avgq = avgq::AvgQ::spawn(avgq::AvgQConfig::from_env())?;
//!
//!     let file = AvgQFile::new("night.cnt")?;
//!     let values = avgq.get_description(&file, &["sfreq", "points_in_file"])?;
//!     println!("{} Hz, {} points", values[0].as_f64().unwrap(), values[1].as_i64().unwrap());
//!
//!     avgq.close()?;
//!     Ok(())
//! }
//! ```
//!
//! ### Averaging epochs around explicit points
//!
//! ```rust
//! use avgq::{EpochSource, FileEpochSource, Script, TimeSpec, TriggerPoint, Result};
//!
//! fn main() -> Result<()> {
//!     # let mut avgq = avgq::doctest_utils::scripted_session(&["nrofaverages=3"]);
//!     let mut source = FileEpochSource::open("night.cnt", TimeSpec::Milliseconds(200.0), TimeSpec::Seconds(1.0))?;
//!     source.set_trigpoints(vec![
//!         TriggerPoint::from(1500),
//!         TriggerPoint::from(2700),
//!         TriggerPoint::from((4100.0, 2, "tone")),
//!     ])?;
//!
//!     let mut script = Script::new();
//!     script.add_epochsource(source);
//!     script.add_transform("baseline_subtract");
//!     script.set_collect("average");
//!     script.add_postprocess("query -N nrofaverages stdout");
//!
//!     for line in script.runrdr(&mut avgq)? {
//!         println!("{}", line?);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ### Splitting a recording around breakpoints
//!
//! Continuous recordings may contain discontinuities (marked by trigger
//! codes 256/257). [`Script::add_epochsource_contfile_excluding_breakpoints`]
//! reads only the clean parts:
//!
//! ```rust
//! use avgq::{AvgQFile, Script};
//!
//! # fn main() -> avgq::Result<()> {
//! # let mut avgq = avgq::doctest_utils::scripted_session(&["-256\t256", "18000\t257"]);
//! let file = AvgQFile::new("night.cnt")?;
//! let breakpoints = avgq.get_breakpoints(&file)?;
//! assert_eq!(breakpoints, vec![18000]);
//!
//! let mut script = Script::new();
//! let n = script.add_epochsource_contfile_excluding_breakpoints(
//!     &file, 0, 36000, breakpoints, 100, Some(3000), None,
//! )?;
//! assert_eq!(n, 10);
//! # Ok(())
//! # }
//! ```
//!
//! ## Protocol Notes
//!
//! * Every script ends with a line `-`. [`AvgQ::runrdr`] appends a second
//!   script echoing a sentinel line and reads output up to that line.
//! * Only one script may be outstanding per engine. Use one [`AvgQ`] per
//!   thread; engines do not share state.
//! * There is no timeout: a script the engine never answers blocks forever.
//! * Binary frames use native-endian `f32` values, as the engine does.

pub mod error;
pub mod types;
pub mod utils;
pub mod trgfile;
pub mod segments;
pub mod file;
pub mod frame;
pub mod process;
pub mod epochsource;
pub mod script;
pub mod array;

#[doc(hidden)]
pub mod doctest_utils; // For internal doctest support

// Re-export main types for convenience
pub use error::{AvgQError, Result};
pub use types::{QueryValue, TimeSpec, Trigger, TriggerPoint, ValueType};
pub use trgfile::{HighresTrigger, Preamble, TriggerFile};
pub use file::{AvgQFile, FileFormat, GetEpochArgs};
pub use process::{AvgQ, AvgQConfig, ResponseLines, ScriptSink};
pub use epochsource::{EpochSource, FileEpochSource, TriggerSource};
pub use script::Script;
pub use array::{ArrayEpoch, ArrayEpochSource};

// Constants
pub const DEFAULT_EXECUTABLE: &str = "avg_q_vogl";
pub const DEFAULT_ENDSTRING: &str = "End of script";
pub const DEFAULT_TRIGGER_SFREQ: f64 = 100.0; // 无 Sfreq 时的假定采样率
pub const BREAK_EVENTS: [i32; 2] = [256, 257];

/// Library version
///
/// # Examples
///
/// ```rust
/// let version = avgq::version();
/// assert!(version.contains('.'));
/// ```
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
