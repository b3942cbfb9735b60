use std::io::{BufRead, Write};

use tracing::debug;

use crate::epochsource::{EpochSource, FileEpochSource};
use crate::error::{AvgQError, Result};
use crate::file::AvgQFile;
use crate::process::{AvgQ, ResponseLines, ScriptSink};
use crate::segments::{clean_sections, fixed_windows, Exclusion};
use crate::types::TriggerPoint;

/// Collection method that discards every epoch
pub const NULL_SINK: &str = "null_sink";

/// A complete engine script assembled from parts
///
/// Parts are sent in a fixed order: every epoch source's request lines,
/// the transforms, the collection method, `Post:` plus post-processing
/// blocks (if any), the `-` terminator, and finally every epoch source's
/// trigger stream.
///
/// # Examples
///
/// ```rust
/// use avgq::{FileEpochSource, Script};
///
/// # let mut avgq = avgq::doctest_utils::scripted_session(&["nr_of_points=100"]);
/// let mut script = Script::new();
/// script.add_epochsource(FileEpochSource::open("rec.cnt", 0, 100)?);
/// script.add_transform("baseline_subtract");
/// script.set_collect("average");
/// script.add_postprocess("query -N nr_of_points stdout");
///
/// let lines = script.runrdr(&mut avgq)?.collect::<avgq::Result<Vec<String>>>()?;
/// assert_eq!(lines, vec!["nr_of_points=100"]);
///
/// let sent = avgq::doctest_utils::sent_script(&avgq);
/// assert!(sent.starts_with(
///     "read_synamps rec.cnt 0 100\nbaseline_subtract\naverage\nPost:\nquery -N nr_of_points stdout\n-\n"
/// ));
/// # Ok::<(), avgq::AvgQError>(())
/// ```
pub struct Script {
    epochsources: Vec<Box<dyn EpochSource>>,
    transforms: Vec<String>,
    collect: String,
    postprocess: Vec<String>,
    saved: Vec<SavedState>,
}

/// 保存点：各列表长度和当时的收集方法
struct SavedState {
    epochsources: usize,
    transforms: usize,
    postprocess: usize,
    collect: String,
}

impl Default for Script {
    fn default() -> Self {
        Script {
            epochsources: Vec::new(),
            transforms: Vec::new(),
            collect: NULL_SINK.to_string(),
            postprocess: Vec::new(),
            saved: Vec::new(),
        }
    }
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_epochsource<E: EpochSource + 'static>(&mut self, epochsource: E) {
        self.epochsources.push(Box::new(epochsource));
    }

    pub fn add_boxed_epochsource(&mut self, epochsource: Box<dyn EpochSource>) {
        self.epochsources.push(epochsource);
    }

    pub fn epochsource_count(&self) -> usize {
        self.epochsources.len()
    }

    /// Appends a transform block; sent as-is plus a newline
    pub fn add_transform(&mut self, transform: impl Into<String>) {
        self.transforms.push(transform.into());
    }

    pub fn transforms(&self) -> &[String] {
        &self.transforms
    }

    pub fn set_collect(&mut self, collect: impl Into<String>) {
        self.collect = collect.into();
    }

    pub fn collect(&self) -> &str {
        &self.collect
    }

    pub fn add_postprocess(&mut self, transform: impl Into<String>) {
        self.postprocess.push(transform.into());
    }

    pub fn postprocess(&self) -> &[String] {
        &self.postprocess
    }

    /// Remembers the current parts so a later [`Script::restore_state`] can
    /// drop everything added in between
    ///
    /// Saves nest as a stack. Changes made inside existing epoch sources
    /// (such as consumed trigger points) are not undone.
    pub fn save_state(&mut self) {
        self.saved.push(SavedState {
            epochsources: self.epochsources.len(),
            transforms: self.transforms.len(),
            postprocess: self.postprocess.len(),
            collect: self.collect.clone(),
        });
    }

    /// Returns to the most recent save point; no-op without one
    pub fn restore_state(&mut self) {
        let Some(state) = self.saved.pop() else {
            return;
        };
        self.epochsources.truncate(state.epochsources);
        self.transforms.truncate(state.transforms);
        self.postprocess.truncate(state.postprocess);
        self.collect = state.collect;
    }

    /// Adds epochs covering `[start_point, end_point)` of a continuous file
    /// while keeping `margin_points` away from every breakpoint
    ///
    /// Without `nr_of_points`, each clean section becomes one epoch of its
    /// own length. With it, fixed-length epochs are packed into the sections,
    /// starting every `step_points` (contiguous by default). Returns the
    /// number of epochs; when that is 0 nothing was added.
    #[allow(clippy::too_many_arguments)]
    pub fn add_epochsource_contfile_excluding_breakpoints<I, E>(
        &mut self,
        infile: &AvgQFile,
        start_point: i64,
        end_point: i64,
        breakpoints: I,
        margin_points: i64,
        nr_of_points: Option<i64>,
        step_points: Option<i64>,
    ) -> Result<usize>
    where
        I: IntoIterator<Item = E>,
        E: Into<Exclusion>,
    {
        let sections = clean_sections(start_point, end_point, breakpoints, margin_points);

        match nr_of_points {
            Some(nr_of_points) if nr_of_points > 0 => {
                let starts = fixed_windows(sections, nr_of_points, step_points);
                if starts.is_empty() {
                    return Ok(0);
                }
                let count = starts.len();
                let mut source = FileEpochSource::new(infile.clone(), 0, nr_of_points);
                source.set_trigpoints(starts.into_iter().map(TriggerPoint::from).collect())?;
                self.add_epochsource(source);
                Ok(count)
            }
            _ => {
                let mut count = 0;
                for (start, end) in sections {
                    let mut source = FileEpochSource::new(infile.clone(), 0, end - start);
                    source.set_trigpoint(TriggerPoint::from(start))?;
                    self.add_epochsource(source);
                    count += 1;
                }
                Ok(count)
            }
        }
    }

    /// Sends the script and returns its response lines
    ///
    /// The whole script, trigger streams included, is composed in memory
    /// first and written in one piece.
    ///
    /// # Errors
    ///
    /// * `AvgQError::NoEpochSource` - nothing was added to read from
    /// * any contract error raised by a source
    ///
    /// No bytes are sent when an error is returned.
    pub fn runrdr<'a, W: Write, R: BufRead>(
        &mut self,
        avgq: &'a mut AvgQ<W, R>,
    ) -> Result<ResponseLines<'a, W, R>> {
        if self.epochsources.is_empty() {
            return Err(AvgQError::NoEpochSource);
        }
        debug!(
            "Running script: {} epoch sources, {} transforms, collect {}",
            self.epochsources.len(),
            self.transforms.len(),
            self.collect
        );

        let mut buf: Vec<u8> = Vec::new();
        for epochsource in self.epochsources.iter_mut() {
            epochsource.send(&mut buf)?;
        }
        let mut body = String::new();
        for transform in &self.transforms {
            body.push_str(transform);
            body.push('\n');
        }
        body.push_str(&self.collect);
        body.push('\n');
        if !self.postprocess.is_empty() {
            body.push_str("Post:\n");
            for transform in &self.postprocess {
                body.push_str(transform);
                body.push('\n');
            }
        }
        body.push_str("-\n");
        buf.write_script(&body)?;

        // 脚本结束后才发送触发点
        for epochsource in self.epochsources.iter_mut() {
            epochsource.send_trigpoints(&mut buf)?;
        }
        avgq.write_binary(&buf)?;
        avgq.runrdr()
    }

    /// Runs the script, printing the output
    pub fn run<W: Write, R: BufRead>(&mut self, avgq: &mut AvgQ<W, R>) -> Result<()> {
        for line in self.runrdr(avgq)? {
            println!("{}", line?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::AvgQConfig;
    use crate::types::TimeSpec;
    use std::io::Cursor;

    fn session(response: &str) -> AvgQ<Vec<u8>, Cursor<Vec<u8>>> {
        AvgQ::from_streams(
            Vec::new(),
            Cursor::new(response.as_bytes().to_vec()),
            AvgQConfig::default(),
        )
    }

    fn sent(avgq: &AvgQ<Vec<u8>, Cursor<Vec<u8>>>) -> String {
        String::from_utf8(avgq.input().unwrap().clone()).unwrap()
    }

    #[test]
    fn test_empty_script_sends_nothing() {
        let mut avgq = session("End of script\n");
        let mut script = Script::new();
        script.add_transform("detrend");
        assert!(matches!(script.runrdr(&mut avgq), Err(AvgQError::NoEpochSource)));
        assert!(sent(&avgq).is_empty());
    }

    #[test]
    fn test_order_with_trigger_stream() {
        let mut avgq = session("End of script\n");
        let mut script = Script::new();
        let mut source = FileEpochSource::open("a.cnt", 0, 10).unwrap();
        source.set_trigpoints(vec![TriggerPoint::from(42)]).unwrap();
        script.add_epochsource(source);
        script.add_transform("detrend -0");
        script.run(&mut avgq).unwrap();

        assert_eq!(
            sent(&avgq),
            "read_synamps -R stdin a.cnt 0 10\n\
             detrend -0\n\
             null_sink\n\
             -\n\
             42\t1\n0\t0\n\
             \n!echo -F stdout End of script\\n\nnull_sink\n-\n"
        );
    }

    #[test]
    fn test_failing_source_sends_nothing() {
        let mut avgq = session("End of script\n");
        let mut script = Script::new();
        script.add_epochsource(FileEpochSource::open("a.cnt", 0, 10).unwrap());
        let mut epoched = FileEpochSource::open("grand.asc", 0, 0).unwrap();
        epoched
            .set_trigpoint(TriggerPoint::Bare(TimeSpec::Seconds(1.0)))
            .unwrap();
        script.add_epochsource(epoched);

        assert!(matches!(script.runrdr(&mut avgq), Err(AvgQError::Unsupported(_))));
        assert!(sent(&avgq).is_empty());
    }

    #[test]
    fn test_save_and_restore() {
        let mut script = Script::new();
        script.add_epochsource(FileEpochSource::open("a.cnt", 0, 10).unwrap());
        script.add_transform("detrend");

        script.save_state();
        script.add_transform("scale_by 2");
        script.add_postprocess("query -N nr_of_points stdout");
        script.set_collect("average");
        script.add_epochsource(FileEpochSource::open("b.cnt", 0, 10).unwrap());

        script.save_state();
        script.add_transform("baseline_subtract");
        script.restore_state();
        assert_eq!(script.transforms(), &["detrend", "scale_by 2"]);

        script.restore_state();
        assert_eq!(script.transforms(), &["detrend"]);
        assert!(script.postprocess().is_empty());
        assert_eq!(script.collect(), NULL_SINK);
        assert_eq!(script.epochsource_count(), 1);

        // 没有保存点时不做任何事
        script.restore_state();
        assert_eq!(script.epochsource_count(), 1);
    }

    #[test]
    fn test_contfile_variable_length() {
        let file = AvgQFile::new("night.cnt").unwrap();
        let mut script = Script::new();
        let n = script
            .add_epochsource_contfile_excluding_breakpoints(
                &file,
                0,
                1000,
                [400_i64],
                5,
                None,
                None,
            )
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(script.epochsource_count(), 2);

        let mut buf: Vec<u8> = Vec::new();
        for source in script.epochsources.iter_mut() {
            source.send(&mut buf).unwrap();
        }
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "read_synamps -R stdin night.cnt 0 395\nread_synamps -R stdin night.cnt 0 595\n"
        );
    }

    #[test]
    fn test_contfile_fixed_length() {
        let file = AvgQFile::new("night.cnt").unwrap();
        let mut script = Script::new();
        let n = script
            .add_epochsource_contfile_excluding_breakpoints(
                &file,
                0,
                1000,
                [500_i64],
                5,
                Some(200),
                None,
            )
            .unwrap();
        // (0,495) 放 2 个，(505,1000) 放 2 个
        assert_eq!(n, 4);
        assert_eq!(script.epochsource_count(), 1);

        let mut buf: Vec<u8> = Vec::new();
        script.epochsources[0].send_trigpoints(&mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "0\t1\n200\t1\n505\t1\n705\t1\n0\t0\n");
    }

    #[test]
    fn test_contfile_zero_windows_adds_nothing() {
        let file = AvgQFile::new("night.cnt").unwrap();
        let mut script = Script::new();
        let n = script
            .add_epochsource_contfile_excluding_breakpoints(
                &file,
                0,
                100,
                [50_i64],
                5,
                Some(60),
                Some(10),
            )
            .unwrap();
        assert_eq!(n, 0);
        assert_eq!(script.epochsource_count(), 0);
    }
}
