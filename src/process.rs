use std::env;
use std::io::{self, BufRead, BufReader, ErrorKind, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use tracing::{debug, info, trace, warn};

use crate::error::{AvgQError, Result};
use crate::file::{AvgQFile, GetEpochArgs};
use crate::frame::{self, Frame, FrameLayout};
use crate::trgfile::TriggerFile;
use crate::types::{value_type, QueryValue, Trigger, ValueType};
use crate::utils::{split_query_line, strip_line_ending};
use crate::{BREAK_EVENTS, DEFAULT_ENDSTRING, DEFAULT_EXECUTABLE};

/// How to start the engine and recognise the end of a response
#[derive(Debug, Clone, PartialEq)]
pub struct AvgQConfig {
    /// Executable name or path
    pub executable: String,
    /// Sentinel line echoed after every script
    pub endstring: String,
    /// Engine trace verbosity, 0 disables tracing
    pub tracelevel: u32,
}

impl Default for AvgQConfig {
    fn default() -> Self {
        AvgQConfig {
            executable: DEFAULT_EXECUTABLE.to_string(),
            endstring: DEFAULT_ENDSTRING.to_string(),
            tracelevel: 0,
        }
    }
}

impl AvgQConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `AVG_Q` (executable) and `AVG_Q_TRACELEVEL`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(executable) = env::var("AVG_Q") {
            if !executable.trim().is_empty() {
                config.executable = executable;
            }
        }
        if let Ok(level) = env::var("AVG_Q_TRACELEVEL") {
            match level.trim().parse() {
                Ok(level) => config.tracelevel = level,
                Err(_) => warn!("Ignoring invalid AVG_Q_TRACELEVEL {:?}", level),
            }
        }
        config
    }

    pub fn with_executable(mut self, executable: impl Into<String>) -> Self {
        self.executable = executable.into();
        self
    }

    pub fn with_endstring(mut self, endstring: impl Into<String>) -> Self {
        self.endstring = endstring.into();
        self
    }

    pub fn with_tracelevel(mut self, tracelevel: u32) -> Self {
        self.tracelevel = tracelevel;
        self
    }
}

/// Destination for script text and binary payloads
///
/// Epoch sources write through this so they do not depend on the stream
/// types of a particular session.
pub trait ScriptSink {
    fn write_script(&mut self, script: &str) -> Result<()>;
    fn write_binary(&mut self, bytes: &[u8]) -> Result<()>;
}

/// A session with one engine process
///
/// The session exclusively owns the engine's input and output pipes. Only
/// one script may be in flight: [`AvgQ::runrdr`] borrows the session
/// mutably until its lines have been consumed, so a second script cannot be
/// written in between.
///
/// There is no timeout. A script the engine accepts but never answers with
/// the sentinel line blocks the reader indefinitely.
///
/// # Examples
///
/// ```rust
/// # let mut avgq = avgq::doctest_utils::scripted_session(&["sfreq=10", "nr_of_points=10"]);
/// // let mut avgq = avgq::AvgQ::spawn(avgq::AvgQConfig::from_env())?;
/// avgq.write("null_source 10 1 30 1s 1s\nquery -N sfreq stdout\nquery -N nr_of_points stdout\nnull_sink\n-\n")?;
/// let lines = avgq.runrdr()?.collect::<avgq::Result<Vec<String>>>()?;
/// assert_eq!(lines, vec!["sfreq=10", "nr_of_points=10"]);
/// # Ok::<(), avgq::AvgQError>(())
/// ```
pub struct AvgQ<W = ChildStdin, R = BufReader<ChildStdout>> {
    input: Option<W>,
    output: Option<R>,
    child: Option<Child>,
    config: AvgQConfig,
}

impl AvgQ {
    /// Starts `<executable> [-t <level>] stdin` with piped stdin/stdout
    pub fn spawn(config: AvgQConfig) -> Result<Self> {
        let mut command = Command::new(&config.executable);
        if config.tracelevel > 0 {
            command.arg("-t").arg(config.tracelevel.to_string());
        }
        command.arg("stdin").stdin(Stdio::piped()).stdout(Stdio::piped());

        let mut child = command.spawn().map_err(|source| AvgQError::SpawnFailed {
            executable: config.executable.clone(),
            source,
        })?;
        let input = child.stdin.take().ok_or_else(|| pipe_missing("stdin"))?;
        let output = child.stdout.take().ok_or_else(|| pipe_missing("stdout"))?;
        info!("Started engine {} (pid {})", config.executable, child.id());

        Ok(AvgQ {
            input: Some(input),
            output: Some(BufReader::new(output)),
            child: Some(child),
            config,
        })
    }

    /// Starts the engine with the default configuration
    pub fn new() -> Result<Self> {
        Self::spawn(AvgQConfig::default())
    }
}

impl<W: Write, R: BufRead> AvgQ<W, R> {
    /// Wraps already-connected streams, e.g. in-memory buffers in tests
    pub fn from_streams(input: W, output: R, config: AvgQConfig) -> Self {
        AvgQ {
            input: Some(input),
            output: Some(output),
            child: None,
            config,
        }
    }

    pub fn config(&self) -> &AvgQConfig {
        &self.config
    }

    /// The input stream, `None` after [`AvgQ::close`]
    pub fn input(&self) -> Option<&W> {
        self.input.as_ref()
    }

    /// Sends script text; flushed before returning
    pub fn write(&mut self, script: &str) -> Result<()> {
        trace!("{}", script);
        let input = self.input.as_mut().ok_or_else(closed)?;
        input.write_all(script.as_bytes())?;
        input.flush()?;
        Ok(())
    }

    /// Sends a binary payload as one contiguous write
    pub fn write_binary(&mut self, bytes: &[u8]) -> Result<()> {
        trace!("<{} bytes of binary data>", bytes.len());
        let input = self.input.as_mut().ok_or_else(closed)?;
        input.write_all(bytes)?;
        input.flush()?;
        Ok(())
    }

    /// Terminates the pending script and returns its response lines
    ///
    /// Appends a script that echoes the sentinel, then yields output lines
    /// until the sentinel or an empty line arrives (neither is yielded).
    pub fn runrdr(&mut self) -> Result<ResponseLines<'_, W, R>> {
        let echo = format!("\n!echo -F stdout {}\\n\nnull_sink\n-\n", self.config.endstring);
        self.write(&echo)?;
        Ok(ResponseLines {
            session: self,
            finished: false,
        })
    }

    /// Runs the pending script, printing the output
    pub fn run(&mut self) -> Result<()> {
        for line in self.runrdr()? {
            println!("{}", line?);
        }
        Ok(())
    }

    /// Writes a get-epoch request line for `file`
    pub fn getepoch(&mut self, file: &AvgQFile, args: &GetEpochArgs) -> Result<()> {
        self.write(&file.getepoch(args))
    }

    /// Queries variables of a data file
    ///
    /// Reads one point of `file` continuously and queries each name. Values
    /// come back in request order, typed by [`value_type`]. List-typed
    /// variables collect every following line up to the next requested
    /// `name=value` line.
    ///
    /// # Errors
    ///
    /// * `AvgQError::MissingQueryResult` - the engine printed nothing for a name,
    ///   typically because it could not read `file`
    /// * `AvgQError::MalformedResponse` - a value did not convert to its type
    ///
    /// # Examples
    ///
    /// ```rust
    /// use avgq::{AvgQFile, QueryValue};
    ///
    /// # let mut avgq = avgq::doctest_utils::scripted_session(&[
    /// #     "channelnames=Fp1", "Fp2", "Cz", "sfreq=250",
    /// # ]);
    /// let file = AvgQFile::new("rec.cnt")?;
    /// let values = avgq.get_description(&file, &["channelnames", "sfreq"])?;
    ///
    /// assert_eq!(values[0].as_list().unwrap(), &["Fp1", "Fp2", "Cz"]);
    /// assert_eq!(values[1], QueryValue::Float(250.0));
    /// # Ok::<(), avgq::AvgQError>(())
    /// ```
    pub fn get_description(&mut self, file: &AvgQFile, names: &[&str]) -> Result<Vec<QueryValue>> {
        let mut args = GetEpochArgs::new(0, 1);
        args.continuous = true;
        args.epochs = Some(1);
        self.getepoch(file, &args)?;
        for name in names {
            self.write(&format!("query -N {} stdout\n", name))?;
        }
        self.write("null_sink\n-\n")?;

        // 先读完整个响应，解析出错时引擎输出也已经排空
        let lines = self.runrdr()?.collect::<Result<Vec<String>>>()?;
        let mut parser = DescriptionParser::new(names);
        for line in &lines {
            parser.feed(line)?;
        }
        parser.finish()
    }

    /// Single-variable form of [`AvgQ::get_description`]
    pub fn get_description_value(&mut self, file: &AvgQFile, name: &str) -> Result<QueryValue> {
        let mut values = self.get_description(file, &[name])?;
        values.pop().ok_or_else(|| AvgQError::MissingQueryResult(name.to_string()))
    }

    /// Events stored in a data file
    ///
    /// For epoched containers the positions are epoch numbers starting at 0,
    /// with the epoch's condition as code and its comment as description.
    pub fn get_filetriggers(&mut self, file: &AvgQFile) -> Result<TriggerFile> {
        if file.format.is_epoched() {
            self.getepoch(file, &GetEpochArgs::default())?;
            self.write("query condition stdout\nquery comment stdout\nnull_sink\n-\n")?;
            let lines = self.runrdr()?.collect::<Result<Vec<String>>>()?;

            let mut trgfile = TriggerFile::new();
            for (position, pair) in lines.chunks(2).enumerate() {
                let [condition, comment] = pair else {
                    debug!("Ignoring incomplete epoch record {:?}", pair);
                    break;
                };
                let code = condition
                    .trim()
                    .parse()
                    .map_err(|_| {
                        AvgQError::MalformedResponse(format!("condition {:?}", condition))
                    })?;
                trgfile.push(
                    Trigger::new(position as f64, code).with_description(comment.as_str()),
                );
            }
            Ok(trgfile)
        } else {
            let mut args = GetEpochArgs::new(0, 1);
            args.continuous = true;
            args.epochs = Some(1);
            args.trigtransfer = true;
            self.getepoch(file, &args)?;
            self.write("query filetriggers_for_trigfile stdout\nnull_sink\n-\n")?;
            let lines = self.runrdr()?.collect::<Result<Vec<String>>>()?;
            Ok(TriggerFile::parse(lines))
        }
    }

    /// Positions of events marking discontinuities in a continuous file
    ///
    /// The start of the file and its end are not reported.
    pub fn get_breakpoints(&mut self, file: &AvgQFile) -> Result<Vec<i64>> {
        let trgfile = self.get_filetriggers(file)?;
        Ok(trgfile
            .triggers()
            .iter()
            .filter(|t| BREAK_EVENTS.contains(&t.code) && t.position > 0.0)
            .map(|t| t.position.round() as i64)
            .collect())
    }

    /// Closes both pipes and waits for the engine to exit
    pub fn close(&mut self) -> Result<()> {
        self.input.take();
        self.output.take();
        if let Some(mut child) = self.child.take() {
            let status = child.wait()?;
            info!("Engine exited with {}", status);
        }
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        let output = self.output.as_mut().ok_or_else(closed)?;
        let mut line = String::new();
        if output.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(strip_line_ending(&line).to_string()))
    }

    /// Exit status if the output closed because the engine went away
    fn exit_status(&mut self) -> Option<String> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => Some(status.to_string()),
            Ok(None) => Some("output closed".to_string()),
            Err(e) => Some(e.to_string()),
        }
    }
}

impl<W: Write, R: BufRead> ScriptSink for AvgQ<W, R> {
    fn write_script(&mut self, script: &str) -> Result<()> {
        self.write(script)
    }

    fn write_binary(&mut self, bytes: &[u8]) -> Result<()> {
        AvgQ::write_binary(self, bytes)
    }
}

/// Captures a script without an engine, e.g. to inspect or save it
impl ScriptSink for Vec<u8> {
    fn write_script(&mut self, script: &str) -> Result<()> {
        self.extend_from_slice(script.as_bytes());
        Ok(())
    }

    fn write_binary(&mut self, bytes: &[u8]) -> Result<()> {
        self.extend_from_slice(bytes);
        Ok(())
    }
}

impl<W, R> Drop for AvgQ<W, R> {
    fn drop(&mut self) {
        self.input.take();
        self.output.take();
        if let Some(mut child) = self.child.take() {
            // 不阻塞；未退出的进程由系统回收
            if let Ok(Some(status)) = child.try_wait() {
                debug!("Engine exited with {}", status);
            }
        }
    }
}

/// Response lines of one script, see [`AvgQ::runrdr`]
///
/// End of stream from a spawned engine before the sentinel is reported as
/// `AvgQError::EngineExited`; for plain streams it simply ends the lines.
pub struct ResponseLines<'a, W: Write, R: BufRead> {
    session: &'a mut AvgQ<W, R>,
    finished: bool,
}

impl<'a, W: Write, R: BufRead> ResponseLines<'a, W, R> {
    /// Reads a binary block placed between response lines
    pub fn read_frame(&mut self, layout: &FrameLayout) -> Result<Frame> {
        let output = self.session.output.as_mut().ok_or_else(closed)?;
        frame::read_frame(output, layout)
    }

    /// Consumes the remaining lines, discarding them
    pub fn drain(self) -> Result<()> {
        for line in self {
            line?;
        }
        Ok(())
    }
}

impl<'a, W: Write, R: BufRead> Iterator for ResponseLines<'a, W, R> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Result<String>> {
        if self.finished {
            return None;
        }
        match self.session.read_line() {
            Ok(Some(line)) => {
                if line.is_empty() || line == self.session.config.endstring {
                    self.finished = true;
                    None
                } else {
                    Some(Ok(line))
                }
            }
            Ok(None) => {
                self.finished = true;
                let status = self.session.exit_status()?;
                warn!("Engine output ended before the end of script ({})", status);
                Some(Err(AvgQError::EngineExited(status)))
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// Per-call accumulator for query responses
struct DescriptionParser<'n> {
    names: &'n [&'n str],
    values: Vec<Option<QueryValue>>,
    list: Option<(usize, Vec<String>)>,
}

impl<'n> DescriptionParser<'n> {
    fn new(names: &'n [&'n str]) -> Self {
        DescriptionParser {
            names,
            values: vec![None; names.len()],
            list: None,
        }
    }

    fn feed(&mut self, line: &str) -> Result<()> {
        if let Some((name, value)) = split_query_line(line) {
            if let Some(index) = self.names.iter().position(|n| *n == name) {
                self.close_list();
                match value_type(name) {
                    ValueType::List => self.list = Some((index, vec![value.to_string()])),
                    scalar => {
                        let value = scalar.convert(name, value)?;
                        self.store(index, value);
                    }
                }
                return Ok(());
            }
        }
        // 未请求的变量或续行，归入正在收集的列表
        if let Some((_, items)) = self.list.as_mut() {
            items.push(line.to_string());
        }
        Ok(())
    }

    fn close_list(&mut self) {
        if let Some((index, items)) = self.list.take() {
            self.store(index, QueryValue::List(items));
        }
    }

    fn store(&mut self, index: usize, value: QueryValue) {
        if self.values[index].is_none() {
            self.values[index] = Some(value);
        }
    }

    fn finish(mut self) -> Result<Vec<QueryValue>> {
        self.close_list();
        self.values
            .into_iter()
            .zip(self.names)
            .map(|(value, name)| {
                value.ok_or_else(|| AvgQError::MissingQueryResult(name.to_string()))
            })
            .collect()
    }
}

fn closed() -> AvgQError {
    AvgQError::Io(io::Error::new(ErrorKind::BrokenPipe, "engine session is closed"))
}

fn pipe_missing(which: &str) -> AvgQError {
    AvgQError::Io(io::Error::new(ErrorKind::Other, format!("engine {} was not captured", which)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn session(response: &str) -> AvgQ<Vec<u8>, Cursor<Vec<u8>>> {
        AvgQ::from_streams(
            Vec::new(),
            Cursor::new(response.as_bytes().to_vec()),
            AvgQConfig::default(),
        )
    }

    #[test]
    fn test_runrdr_stops_at_sentinel() {
        let mut avgq = session("a\r\nb\nEnd of script\nc\nEnd of script\n");
        let lines: Vec<String> = avgq.runrdr().unwrap().map(|l| l.unwrap()).collect();
        assert_eq!(lines, vec!["a", "b"]);

        // 第二次读取从哨兵之后继续
        let lines: Vec<String> = avgq.runrdr().unwrap().map(|l| l.unwrap()).collect();
        assert_eq!(lines, vec!["c"]);

        let sent = String::from_utf8(avgq.input().unwrap().clone()).unwrap();
        assert_eq!(sent.matches("!echo -F stdout End of script\\n\nnull_sink\n-\n").count(), 2);
    }

    #[test]
    fn test_runrdr_stops_at_empty_line_and_eof() {
        let mut avgq = session("x\n\ny\n");
        let lines: Vec<String> = avgq.runrdr().unwrap().map(|l| l.unwrap()).collect();
        assert_eq!(lines, vec!["x"]);
        let lines: Vec<String> = avgq.runrdr().unwrap().map(|l| l.unwrap()).collect();
        assert_eq!(lines, vec!["y"]);
        assert_eq!(avgq.runrdr().unwrap().count(), 0);
    }

    #[test]
    fn test_custom_endstring() {
        let config = AvgQConfig::new().with_endstring("DONE");
        let mut avgq = AvgQ::from_streams(Vec::new(), Cursor::new(b"1\nDONE\n".to_vec()), config);
        assert_eq!(avgq.runrdr().unwrap().count(), 1);
        let sent = String::from_utf8(avgq.input().unwrap().clone()).unwrap();
        assert!(sent.contains("!echo -F stdout DONE\\n"));
    }

    #[test]
    fn test_description_parser_list_then_scalar() {
        let names = ["channelnames", "sfreq"];
        let mut parser = DescriptionParser::new(&names);
        for line in ["channelnames=Fp1", "Fp2", "other=1", "sfreq=100"] {
            parser.feed(line).unwrap();
        }
        let values = parser.finish().unwrap();
        assert_eq!(
            values[0],
            QueryValue::List(vec!["Fp1".into(), "Fp2".into(), "other=1".into()])
        );
        assert_eq!(values[1], QueryValue::Float(100.0));
    }

    #[test]
    fn test_description_parser_missing_value() {
        let names = ["sfreq", "nr_of_points"];
        let mut parser = DescriptionParser::new(&names);
        parser.feed("sfreq=100").unwrap();
        match parser.finish() {
            Err(AvgQError::MissingQueryResult(name)) => assert_eq!(name, "nr_of_points"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_closed_session_rejects_writes() {
        let mut avgq = session("");
        avgq.close().unwrap();
        assert!(avgq.write("null_sink\n-\n").is_err());
        assert!(avgq.input().is_none());
    }

    #[test]
    fn test_config_builders() {
        let config = AvgQConfig::new()
            .with_executable("/opt/avg_q/bin/avg_q_ui")
            .with_tracelevel(2);
        assert_eq!(config.executable, "/opt/avg_q/bin/avg_q_ui");
        assert_eq!(config.tracelevel, 2);
        assert_eq!(config.endstring, "End of script");
    }

    #[test]
    fn test_spawn_missing_executable() {
        let config = AvgQConfig::new().with_executable("/nonexistent/avg_q_binary");
        match AvgQ::spawn(config) {
            Err(AvgQError::SpawnFailed { executable, .. }) => {
                assert_eq!(executable, "/nonexistent/avg_q_binary")
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("spawn should fail"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_drop_does_not_block_on_child() {
        // yes 不会自行退出
        let running = AvgQ::spawn(AvgQConfig::new().with_executable("yes")).unwrap();
        drop(running);

        let exited = AvgQ::spawn(AvgQConfig::new().with_executable("true")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(200));
        drop(exited);
    }
}
