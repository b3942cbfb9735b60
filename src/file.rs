use std::fmt;
use std::path::Path;

use crate::error::{AvgQError, Result};
use crate::types::TimeSpec;
use crate::utils::escape_filename;

/// Data file formats the engine can read epochs from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    NeuroScan,
    BrainVision,
    /// Already-epoched container: addressed by epoch number, not position
    Asc,
    Hdf,
    Rec,
    Freiburg,
    Neurofile,
    Inomed,
    Sound,
}

/// 格式与扩展名对照表，按顺序匹配
const FORMATS_AND_EXTENSIONS: &[(FileFormat, &[&str])] = &[
    (FileFormat::NeuroScan, &[".avg", ".eeg", ".cnt"]),
    (FileFormat::BrainVision, &[".vmrk", ".vhdr", ".eeg"]),
    (FileFormat::Asc, &[".asc"]),
    (FileFormat::Hdf, &[".hdf"]),
    (FileFormat::Rec, &[".edf", ".rec"]),
    (FileFormat::Freiburg, &[".co"]),
    (FileFormat::Neurofile, &[".eeg"]),
    (FileFormat::Inomed, &[".emg", ".trg"]),
    (FileFormat::Sound, &[".wav", ".WAV", ".au", ".AU", ".snd", ".SND"]),
];

impl FileFormat {
    /// Looks up a format by file extension (including the dot)
    pub fn from_extension(ext: &str) -> Option<FileFormat> {
        let find = |ext: &str| {
            FORMATS_AND_EXTENSIONS
                .iter()
                .find(|(_, exts)| exts.contains(&ext))
                .map(|(format, _)| *format)
        };
        find(ext).or_else(|| find(&ext.to_lowercase()))
    }

    /// True for containers whose "trigger positions" are epoch numbers
    pub fn is_epoched(&self) -> bool {
        matches!(self, FileFormat::Asc)
    }

    /// Formats whose read method appends the extension itself
    fn strips_extension(&self) -> bool {
        matches!(self, FileFormat::Asc | FileFormat::Hdf | FileFormat::BrainVision)
    }

    pub fn name(&self) -> &'static str {
        match self {
            FileFormat::NeuroScan => "NeuroScan",
            FileFormat::BrainVision => "BrainVision",
            FileFormat::Asc => "asc",
            FileFormat::Hdf => "hdf",
            FileFormat::Rec => "rec",
            FileFormat::Freiburg => "freiburg",
            FileFormat::Neurofile => "neurofile",
            FileFormat::Inomed => "Inomed",
            FileFormat::Sound => "sound",
        }
    }
}

/// Options of one get-epoch request line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetEpochArgs {
    pub beforetrig: TimeSpec,
    pub aftertrig: TimeSpec,
    pub continuous: bool,
    pub fromepoch: Option<i64>,
    pub epochs: Option<i64>,
    pub offset: Option<TimeSpec>,
    pub triglist: Option<String>,
    pub trigfile: Option<String>,
    pub trigtransfer: bool,
}

impl GetEpochArgs {
    pub fn new(beforetrig: impl Into<TimeSpec>, aftertrig: impl Into<TimeSpec>) -> Self {
        GetEpochArgs {
            beforetrig: beforetrig.into(),
            aftertrig: aftertrig.into(),
            ..Default::default()
        }
    }
}

/// A data file together with the engine method used to read it
///
/// # Examples
///
/// ```rust
/// use avgq::{AvgQFile, GetEpochArgs, TimeSpec};
///
/// let file = AvgQFile::new("session 1.cnt")?;
/// let mut args = GetEpochArgs::new(TimeSpec::Milliseconds(100.0), TimeSpec::Milliseconds(400.0));
/// args.triglist = Some("1,3".to_string());
///
/// assert_eq!(
///     file.getepoch(&args),
///     "read_synamps -t 1,3 session\\ 1.cnt 100ms 400ms\n"
/// );
/// # Ok::<(), avgq::AvgQError>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AvgQFile {
    pub filename: String,
    pub format: FileFormat,
    /// Extra script lines appended after every request line
    pub addmethods: Option<String>,
    /// Trigger file used when a request does not name one
    pub trigfile: Option<String>,
}

impl AvgQFile {
    /// Creates a descriptor, guessing the format from the extension
    pub fn new(filename: &str) -> Result<Self> {
        let (filename, format) = guess_format(filename)?;
        Ok(Self::with_format(filename, format))
    }

    /// Creates a descriptor with a known format; `filename` is used as given
    pub fn with_format(filename: impl Into<String>, format: FileFormat) -> Self {
        AvgQFile {
            filename: filename.into(),
            format,
            addmethods: None,
            trigfile: None,
        }
    }

    /// Builds the request line(s) for reading epochs from this file
    pub fn getepoch(&self, args: &GetEpochArgs) -> String {
        let trigfile = args.trigfile.as_ref().or(self.trigfile.as_ref());

        let continuous = args.continuous.then(|| "-c".to_string());
        let fromepoch = args.fromepoch.map(|n| format!("-f {}", n));
        let epochs = args.epochs.map(|n| format!("-e {}", n));
        let offset = args.offset.map(|o| format!("-o {}", o));
        let triglist = args.triglist.as_ref().map(|t| format!("-t {}", t));
        let trigfile = trigfile.map(|t| format!("-R {}", t));
        let trigtransfer = args.trigtransfer.then(|| "-T".to_string());

        let filename = escape_filename(&self.filename);
        let beforetrig = args.beforetrig.to_string();
        let aftertrig = args.aftertrig.to_string();

        // 各格式的读取方法及其支持的参数
        let (method, options, operands): (&str, Vec<Option<String>>, Vec<String>) =
            match self.format {
                FileFormat::BrainVision => (
                    "read_brainvision",
                    vec![continuous, fromepoch, epochs, offset, triglist, trigfile, trigtransfer],
                    vec![format!("{}.vhdr", filename), beforetrig, aftertrig],
                ),
                FileFormat::NeuroScan => (
                    "read_synamps",
                    vec![continuous, fromepoch, epochs, offset, triglist, trigfile, trigtransfer],
                    vec![filename, beforetrig, aftertrig],
                ),
                FileFormat::Asc => (
                    "readasc",
                    vec![fromepoch, epochs],
                    vec![format!("{}.asc", filename)],
                ),
                FileFormat::Hdf => (
                    "read_hdf",
                    vec![continuous, fromepoch, epochs, offset, triglist, trigfile, trigtransfer],
                    vec![format!("{}.hdf", filename), beforetrig, aftertrig],
                ),
                FileFormat::Rec => (
                    "read_rec",
                    vec![fromepoch, epochs, offset],
                    vec![filename, aftertrig],
                ),
                FileFormat::Freiburg => (
                    "read_freiburg",
                    vec![continuous, fromepoch, epochs, offset],
                    vec![filename, aftertrig],
                ),
                FileFormat::Neurofile => (
                    "read_neurofile",
                    vec![continuous, fromepoch, epochs, offset, triglist, trigfile, trigtransfer],
                    vec![filename, beforetrig, aftertrig],
                ),
                FileFormat::Inomed => (
                    "read_inomed",
                    vec![continuous, fromepoch, epochs, offset, triglist, trigfile, trigtransfer],
                    vec![filename, beforetrig, aftertrig],
                ),
                FileFormat::Sound => (
                    "read_sound",
                    vec![fromepoch, epochs, offset],
                    vec![filename, aftertrig],
                ),
            };

        let mut line = method.to_string();
        for word in options.into_iter().flatten().chain(operands) {
            line.push(' ');
            line.push_str(&word);
        }
        line.push('\n');
        if let Some(addmethods) = &self.addmethods {
            line.push_str(addmethods);
            if !addmethods.ends_with('\n') {
                line.push('\n');
            }
        }
        line
    }
}

impl fmt::Display for AvgQFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.filename, self.format.name())
    }
}

/// Guesses the format from the extension
///
/// For formats whose read method adds the extension itself, the returned
/// name has the extension removed.
pub fn guess_format(filename: &str) -> Result<(String, FileFormat)> {
    let path = Path::new(filename);
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .ok_or_else(|| AvgQError::UnknownFormat(filename.to_string()))?;
    let format = FileFormat::from_extension(&ext)
        .ok_or_else(|| AvgQError::UnknownFormat(filename.to_string()))?;

    let name = if format.strips_extension() {
        filename[..filename.len() - ext.len()].to_string()
    } else {
        filename.to_string()
    };
    Ok((name, format))
}
