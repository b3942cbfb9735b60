//! Epochs as in-memory sample arrays
//!
//! [`ArrayEpochSource`] streams arrays into the engine as binary frames and
//! [`Script::read_epochs`] reads processed epochs back the same way.

use std::fmt;
use std::io::{BufRead, Write};

use tracing::debug;

use crate::epochsource::EpochSource;
use crate::error::{AvgQError, Result};
use crate::frame::{encode, FrameLayout};
use crate::process::{AvgQ, ResponseLines, ScriptSink};
use crate::script::{Script, NULL_SINK};
use crate::types::TriggerPoint;
use crate::utils::branch_line;
use crate::DEFAULT_TRIGGER_SFREQ;

/// Appended to a script to dump every epoch (or the collected result)
const READ_EPOCHS_TRANSFORM: &str = "\
echo -F stdout Epoch Dataset\\n
query channelpositions stdout
query -N comment stdout
query -N sfreq stdout
query -N nr_of_points stdout
query -N itemsize stdout
echo -F stdout Data:\\n
write_generic -x stdout float32";

/// One epoch of multichannel samples
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayEpoch {
    pub comment: Option<String>,
    pub channelnames: Vec<String>,
    pub channelpos: Vec<[f64; 3]>,
    pub sfreq: Option<f64>,
    pub nr_of_points: usize,
    pub nr_of_channels: usize,
    pub itemsize: usize,
    /// Per-point x axis (e.g. time), if any
    pub xdata: Option<Vec<f32>>,
    /// Row-major `nr_of_points × (nr_of_channels * itemsize)` samples
    pub data: Vec<f32>,
}

impl Default for ArrayEpoch {
    fn default() -> Self {
        ArrayEpoch {
            comment: None,
            channelnames: Vec::new(),
            channelpos: Vec::new(),
            sfreq: None,
            nr_of_points: 0,
            nr_of_channels: 0,
            itemsize: 1,
            xdata: None,
            data: Vec::new(),
        }
    }
}

impl ArrayEpoch {
    /// Wraps row-major samples with one value per channel and point
    pub fn new(nr_of_points: usize, nr_of_channels: usize, data: Vec<f32>) -> Result<Self> {
        let expected = nr_of_points * nr_of_channels;
        if data.len() != expected {
            return Err(AvgQError::FrameSize {
                expected,
                actual: data.len(),
            });
        }
        Ok(ArrayEpoch {
            nr_of_points,
            nr_of_channels,
            data,
            ..Default::default()
        })
    }

    pub fn with_sfreq(mut self, sfreq: f64) -> Self {
        self.sfreq = Some(sfreq);
        self
    }

    pub fn with_xdata(mut self, xdata: Vec<f32>) -> Self {
        self.xdata = Some(xdata);
        self
    }

    pub fn with_channelnames<S: Into<String>>(
        mut self,
        names: impl IntoIterator<Item = S>,
    ) -> Self {
        self.channelnames = names.into_iter().map(Into::into).collect();
        self
    }

    /// Sample of `channel` at `point` (first item)
    pub fn sample(&self, point: usize, channel: usize) -> Option<f32> {
        if point >= self.nr_of_points || channel >= self.nr_of_channels {
            return None;
        }
        let columns = self.nr_of_channels * self.itemsize;
        self.data.get(point * columns + channel * self.itemsize).copied()
    }

    /// Layout of this epoch on the wire
    pub fn layout(&self) -> FrameLayout {
        FrameLayout::new(self.nr_of_points, self.nr_of_channels)
            .with_itemsize(self.itemsize)
            .with_xdata(self.xdata.is_some())
    }
}

impl fmt::Display for ArrayEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(comment) = &self.comment {
            write!(f, "{}: ", comment)?;
        }
        write!(f, "{} x {}", self.nr_of_points, self.nr_of_channels)?;
        if let Some(sfreq) = self.sfreq {
            write!(f, " sfreq {}", sfreq)?;
        }
        Ok(())
    }
}

/// Epochs supplied from memory instead of a file
///
/// The engine is told to read the frames from its input; the frames follow
/// once the script is complete. All epochs share the shape, sampling rate
/// and channel setup of the first.
///
/// # Examples
///
/// ```rust
/// use avgq::{ArrayEpoch, ArrayEpochSource, EpochSource};
///
/// let epoch = ArrayEpoch::new(2, 2, vec![1.0, 2.0, 3.0, 4.0])?
///     .with_sfreq(250.0)
///     .with_channelnames(["C3", "C4"]);
/// let mut source = ArrayEpochSource::new(vec![epoch]);
///
/// let mut script: Vec<u8> = Vec::new();
/// source.send(&mut script)?;
/// assert_eq!(
///     String::from_utf8(script).unwrap(),
///     "read_generic -c -s 250 -C 2 -e 1 stdin 0 2 float32\n\
///      >set_channelposition -s C3 0 0 0 C4 1 0 0\n"
/// );
///
/// let mut frames: Vec<u8> = Vec::new();
/// source.send_trigpoints(&mut frames)?;
/// assert_eq!(frames.len(), 2 * 2 * 4);
/// # Ok::<(), avgq::AvgQError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct ArrayEpochSource {
    pub epochs: Vec<ArrayEpoch>,
    /// Script lines applied only to these epochs
    pub branch: Vec<String>,
}

impl ArrayEpochSource {
    pub fn new(epochs: Vec<ArrayEpoch>) -> Self {
        ArrayEpochSource {
            epochs,
            branch: Vec::new(),
        }
    }

    fn check_shapes(&self) -> Result<()> {
        let Some(first) = self.epochs.first() else {
            return Ok(());
        };
        let layout = first.layout();
        for (i, epoch) in self.epochs.iter().enumerate() {
            if epoch.layout() != layout {
                return Err(AvgQError::Unsupported(format!(
                    "epoch {} is {} but the first epoch is {}",
                    i, epoch, first
                )));
            }
            let expected = layout.points * layout.data_columns();
            if epoch.data.len() != expected {
                return Err(AvgQError::FrameSize {
                    expected,
                    actual: epoch.data.len(),
                });
            }
            if let Some(xdata) = &epoch.xdata {
                if xdata.len() != layout.points {
                    return Err(AvgQError::FrameSize {
                        expected: layout.points,
                        actual: xdata.len(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl EpochSource for ArrayEpochSource {
    fn set_trigpoints(&mut self, _points: Vec<TriggerPoint>) -> Result<()> {
        Err(AvgQError::Unsupported(
            "array epoch sources cannot read around trigger points".to_string(),
        ))
    }

    fn send(&mut self, sink: &mut dyn ScriptSink) -> Result<()> {
        self.check_shapes()?;
        let Some(first) = self.epochs.first() else {
            return Ok(());
        };

        let mut script = String::from("read_generic -c");
        if first.xdata.is_some() {
            script.push_str(" -x xdata");
        }
        script.push_str(&format!(
            " -s {} -C {} -e {} stdin 0 {} float32\n",
            first.sfreq.unwrap_or(DEFAULT_TRIGGER_SFREQ),
            first.nr_of_channels,
            self.epochs.len(),
            first.nr_of_points
        ));

        if !first.channelnames.is_empty() {
            script.push_str(">set_channelposition -s");
            for (i, name) in first.channelnames.iter().enumerate() {
                // 没有位置时按序号排成一行
                let [x, y, z] = first.channelpos.get(i).copied().unwrap_or([i as f64, 0.0, 0.0]);
                script.push_str(&format!(" {} {} {} {}", name, x, y, z));
            }
            script.push('\n');
        }
        for line in self.branch.iter().filter_map(|l| branch_line(l)) {
            script.push_str(&line);
            script.push('\n');
        }
        sink.write_script(&script)
    }

    fn send_trigpoints(&mut self, sink: &mut dyn ScriptSink) -> Result<()> {
        for epoch in &self.epochs {
            let bytes = encode(&epoch.layout(), epoch.xdata.as_deref(), &epoch.data)?;
            sink.write_binary(&bytes)?;
        }
        Ok(())
    }
}

impl Script {
    /// Runs the script and reads back the resulting epochs
    ///
    /// Without a collection method every epoch is returned; otherwise the
    /// post-processed result. The script itself is left as it was.
    pub fn read_epochs<W: Write, R: BufRead>(
        &mut self,
        avgq: &mut AvgQ<W, R>,
    ) -> Result<Vec<ArrayEpoch>> {
        self.save_state();
        if self.collect() == NULL_SINK {
            self.add_transform(READ_EPOCHS_TRANSFORM);
        } else {
            self.add_postprocess(READ_EPOCHS_TRANSFORM);
        }
        let result = self
            .runrdr(avgq)
            .and_then(|mut lines| read_epoch_stream(&mut lines));
        self.restore_state();
        result
    }
}

fn read_epoch_stream<W: Write, R: BufRead>(
    lines: &mut ResponseLines<'_, W, R>,
) -> Result<Vec<ArrayEpoch>> {
    let mut epochs = Vec::new();
    loop {
        match lines.next().transpose()? {
            Some(line) if line == "Epoch Dataset" => {}
            Some(line) => {
                debug!("Unexpected line {:?} instead of an epoch", line);
                break;
            }
            None => return Ok(epochs),
        }
        epochs.push(read_epoch(lines)?);
    }
    for line in lines.by_ref() {
        line?;
    }
    Ok(epochs)
}

fn read_epoch<W: Write, R: BufRead>(lines: &mut ResponseLines<'_, W, R>) -> Result<ArrayEpoch> {
    let mut epoch = ArrayEpoch::default();

    // 通道位置行：name\tx\ty\tz，直到第一条 name=value
    let mut line = loop {
        let line = next_line(lines)?;
        if line.contains('=') {
            break line;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        let [name, x, y, z] = fields.as_slice() else {
            return Err(AvgQError::MalformedResponse(format!("channel position {:?}", line)));
        };
        epoch.channelnames.push(name.to_string());
        epoch.channelpos.push([parse(x, &line)?, parse(y, &line)?, parse(z, &line)?]);
    };

    while line != "Data:" {
        let Some((name, value)) = line.split_once('=') else {
            return Err(AvgQError::MalformedResponse(format!("epoch header {:?}", line)));
        };
        match name {
            "comment" => epoch.comment = Some(value.to_string()),
            "sfreq" => epoch.sfreq = Some(parse(value, &line)?),
            "nr_of_points" => epoch.nr_of_points = parse(value, &line)?,
            "itemsize" => epoch.itemsize = parse(value, &line)?,
            _ => {}
        }
        line = next_line(lines)?;
    }
    epoch.nr_of_channels = epoch.channelnames.len();

    let layout = FrameLayout::new(epoch.nr_of_points, epoch.nr_of_channels)
        .with_itemsize(epoch.itemsize)
        .with_xdata(true);
    let frame = lines.read_frame(&layout)?;
    epoch.xdata = frame.xdata;
    epoch.data = frame.data;
    debug!("Read epoch {}", epoch);
    Ok(epoch)
}

fn next_line<W: Write, R: BufRead>(lines: &mut ResponseLines<'_, W, R>) -> Result<String> {
    lines
        .next()
        .unwrap_or_else(|| Err(AvgQError::MalformedResponse("epoch truncated".to_string())))
}

fn parse<T: std::str::FromStr>(value: &str, line: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| AvgQError::MalformedResponse(line.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epochsource::FileEpochSource;
    use crate::process::AvgQConfig;
    use std::io::Cursor;

    fn epoch_response(comment: &str, xdata: &[f32], data: &[f32], channels: &[&str]) -> Vec<u8> {
        let mut response = b"Epoch Dataset\n".to_vec();
        for (i, name) in channels.iter().enumerate() {
            response.extend_from_slice(format!("{}\t{}\t0\t0\n", name, i).as_bytes());
        }
        response.extend_from_slice(
            format!(
                "comment={}\nsfreq=100\nnr_of_points={}\nitemsize=1\nData:\n",
                comment,
                xdata.len()
            )
            .as_bytes(),
        );
        let layout = FrameLayout::new(xdata.len(), channels.len()).with_xdata(true);
        response.extend(encode(&layout, Some(xdata), data).unwrap());
        response
    }

    #[test]
    fn test_read_epochs_parses_frames_and_restores_script() {
        let mut response =
            epoch_response("first", &[0.0, 0.01], &[1.0, 2.0, 3.0, 4.0], &["C3", "C4"]);
        response.extend(epoch_response("a=b", &[0.0], &[5.0, 6.0], &["C3", "C4"]));
        response.extend_from_slice(b"End of script\n");
        let mut avgq = AvgQ::from_streams(Vec::new(), Cursor::new(response), AvgQConfig::default());

        let mut script = Script::new();
        script.add_epochsource(FileEpochSource::open("a.cnt", 0, 2).unwrap());
        let epochs = script.read_epochs(&mut avgq).unwrap();

        assert_eq!(epochs.len(), 2);
        assert_eq!(epochs[0].comment.as_deref(), Some("first"));
        assert_eq!(epochs[0].channelnames, vec!["C3", "C4"]);
        assert_eq!(epochs[0].channelpos[1], [1.0, 0.0, 0.0]);
        assert_eq!(epochs[0].sfreq, Some(100.0));
        assert_eq!(epochs[0].xdata.as_deref(), Some(&[0.0, 0.01][..]));
        assert_eq!(epochs[0].sample(1, 0), Some(3.0));
        assert_eq!(epochs[1].comment.as_deref(), Some("a=b"));
        assert_eq!(epochs[1].data, vec![5.0, 6.0]);

        // 临时添加的 transform 已撤销
        assert!(script.transforms().is_empty());
        let sent = String::from_utf8(avgq.input().unwrap().clone()).unwrap();
        assert!(sent.contains("write_generic -x stdout float32\nnull_sink\n-\n"));
    }

    #[test]
    fn test_read_epochs_after_collect_uses_postprocess() {
        let mut avgq = AvgQ::from_streams(
            Vec::new(),
            Cursor::new(b"End of script\n".to_vec()),
            AvgQConfig::default(),
        );
        let mut script = Script::new();
        script.add_epochsource(FileEpochSource::open("a.cnt", 0, 2).unwrap());
        script.set_collect("average");
        assert!(script.read_epochs(&mut avgq).unwrap().is_empty());
        assert!(script.postprocess().is_empty());

        let sent = String::from_utf8(avgq.input().unwrap().clone()).unwrap();
        assert!(sent.contains("average\nPost:\necho -F stdout Epoch Dataset\\n\n"));
    }

    #[test]
    fn test_send_with_xdata_and_branch() {
        let epochs = vec![
            ArrayEpoch::new(2, 1, vec![1.0, 2.0]).unwrap().with_xdata(vec![0.0, 0.5]),
            ArrayEpoch::new(2, 1, vec![3.0, 4.0]).unwrap().with_xdata(vec![0.0, 0.5]),
        ];
        let mut source = ArrayEpochSource::new(epochs);
        source.branch = vec!["scale_by 2".to_string()];

        let mut script: Vec<u8> = Vec::new();
        source.send(&mut script).unwrap();
        assert_eq!(
            String::from_utf8(script).unwrap(),
            "read_generic -c -x xdata -s 100 -C 1 -e 2 stdin 0 2 float32\n>scale_by 2\n"
        );

        let mut frames: Vec<u8> = Vec::new();
        source.send_trigpoints(&mut frames).unwrap();
        assert_eq!(frames.len(), 2 * 2 * (1 + 1) * 4);
        assert_eq!(&frames[4..8], &1.0f32.to_ne_bytes());
    }

    #[test]
    fn test_contract_errors() {
        let mut source = ArrayEpochSource::new(vec![
            ArrayEpoch::new(2, 1, vec![1.0, 2.0]).unwrap(),
            ArrayEpoch::new(3, 1, vec![1.0, 2.0, 3.0]).unwrap(),
        ]);
        assert!(source.set_trigpoint(TriggerPoint::from(0)).is_err());

        let mut script: Vec<u8> = Vec::new();
        assert!(source.send(&mut script).is_err());
        assert!(script.is_empty());

        assert!(ArrayEpoch::new(2, 2, vec![1.0]).is_err());

        let mut empty = ArrayEpochSource::default();
        empty.send(&mut script).unwrap();
        assert!(script.is_empty());
    }

    #[test]
    fn test_short_xdata_is_rejected_before_sending() {
        let epoch = ArrayEpoch::new(3, 1, vec![1.0, 2.0, 3.0])
            .unwrap()
            .with_xdata(vec![0.0]);
        let mut source = ArrayEpochSource::new(vec![epoch]);
        let mut script: Vec<u8> = Vec::new();
        assert!(matches!(
            source.send(&mut script),
            Err(AvgQError::FrameSize { expected: 3, actual: 1 })
        ));
        assert!(script.is_empty());
    }
}
