use super::breakpoints::{Breakpoint, Breakpoints};
use super::controls::{DebugControls, PauseReason, PausedFrame};
use super::stepping::{DebugAction, ExceptionPolicy};
use crate::frame::{ExecEvent, UnitId};
use std::io::{self, BufRead, Write};

const HELP: &str = "Commands: (c)ontinue, (n)ext, (s)tep in, (o)ut, (b)reak <line>, (d)elete <line>, (p)rint [name], bt, detach, (q)uit";

/// Line-oriented interactive controls. Reads commands from `input` and
/// writes pause reports to `output`.
pub struct ConsoleControls<R, W> {
    input: R,
    output: W,
    unit: UnitId,
    source: Vec<String>,
    breakpoints: Breakpoints,
    policy: ExceptionPolicy,
}

impl<R: BufRead + Send, W: Write + Send> ConsoleControls<R, W> {
    pub fn new(input: R, output: W, unit: UnitId, source: &str) -> Self {
        Self {
            input,
            output,
            unit,
            source: source.lines().map(str::to_string).collect(),
            breakpoints: Breakpoints::new(),
            policy: ExceptionPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ExceptionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn report(&mut self, paused: &PausedFrame<'_>) -> io::Result<()> {
        let frame = paused.frame;
        let what = match (paused.reason, frame.event) {
            (PauseReason::Exception, _) => "exception",
            (PauseReason::Breakpoint, _) => "breakpoint",
            (_, ExecEvent::Return) => "return",
            _ => "step",
        };
        writeln!(
            self.output,
            "Paused ({}) at line {} in {} [depth {}]",
            what,
            frame.line(),
            frame.function,
            frame.depth
        )?;
        if let Some(exception) = &frame.exception {
            let kind = if exception.handled { "handled" } else { "unhandled" };
            writeln!(self.output, "  {} exception: {}", kind, exception.message)?;
        }
        if let Some(text) = self.source.get(frame.line().saturating_sub(1) as usize) {
            writeln!(self.output, "  {:>4} | {}", frame.line(), text.trim_end())?;
        }
        Ok(())
    }

    fn print_variables(&mut self, paused: &PausedFrame<'_>, name: Option<&str>) -> io::Result<()> {
        let mut shown = 0;
        for variable in paused.variables {
            if name.map_or(false, |n| n != variable.name) {
                continue;
            }
            let marker = if variable.modified { "*" } else { " " };
            writeln!(
                self.output,
                "  {}{} = {}",
                marker,
                variable.name,
                variable.value.repr()
            )?;
            shown += 1;
        }
        if shown == 0 {
            match name {
                Some(name) => writeln!(self.output, "  '{}' is not visible here", name)?,
                None => writeln!(self.output, "  <no variables>")?,
            }
        }
        Ok(())
    }

    fn print_stack(&mut self, paused: &PausedFrame<'_>) -> io::Result<()> {
        writeln!(self.output, "=== Call Stack ({} frames) ===", paused.stack.len())?;
        for frame in paused.stack.iter().rev() {
            writeln!(
                self.output,
                "  #{}: {} at line {}",
                frame.depth,
                frame.function,
                frame.line()
            )?;
        }
        Ok(())
    }

    fn prompt(&mut self, paused: &PausedFrame<'_>) -> io::Result<DebugAction> {
        self.report(paused)?;
        loop {
            write!(self.output, "> ")?;
            self.output.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                // input closed: let the script finish on its own
                return Ok(DebugAction::Disconnect);
            }
            let Some(words) = shlex::split(line.trim()) else {
                writeln!(self.output, "Unbalanced quotes")?;
                continue;
            };
            let args: Vec<&str> = words.iter().map(String::as_str).collect();
            match args.as_slice() {
                [] | ["s"] | ["step"] => return Ok(DebugAction::StepIn),
                ["c"] | ["continue"] => return Ok(DebugAction::Continue),
                ["n"] | ["next"] => return Ok(DebugAction::StepOver),
                ["o"] | ["out"] => return Ok(DebugAction::StepOut),
                ["q"] | ["quit"] => return Ok(DebugAction::Stop),
                ["detach"] => return Ok(DebugAction::Disconnect),
                ["p"] | ["print"] => self.print_variables(paused, None)?,
                ["p", name] | ["print", name] => self.print_variables(paused, Some(*name))?,
                ["bt"] => self.print_stack(paused)?,
                ["b"] | ["break"] => {
                    for breakpoint in self.breakpoints.sorted() {
                        writeln!(self.output, "  line {}", breakpoint.line)?;
                    }
                }
                ["b", line] | ["break", line] => match line.parse::<u32>() {
                    Ok(line) => {
                        self.breakpoints.add(Breakpoint::new(self.unit, line));
                        writeln!(self.output, "Breakpoint set at line {}", line)?;
                    }
                    Err(_) => writeln!(self.output, "Invalid line number")?,
                },
                ["d", line] | ["delete", line] => match line.parse::<u32>() {
                    Ok(line) => {
                        let removed = self.breakpoints.remove_line(self.unit, line);
                        writeln!(self.output, "Removed {} breakpoint(s) from line {}", removed, line)?;
                    }
                    Err(_) => writeln!(self.output, "Invalid line number")?,
                },
                ["h"] | ["help"] => writeln!(self.output, "{}", HELP)?,
                _ => writeln!(self.output, "Unknown command: {}", line.trim())?,
            }
        }
    }
}

impl<R: BufRead + Send, W: Write + Send> DebugControls for ConsoleControls<R, W> {
    fn breakpoints(&self) -> &Breakpoints {
        &self.breakpoints
    }

    fn breakpoints_mut(&mut self) -> &mut Breakpoints {
        &mut self.breakpoints
    }

    fn exception_policy(&self) -> ExceptionPolicy {
        self.policy
    }

    fn pause(&mut self, paused: &PausedFrame<'_>) -> DebugAction {
        match self.prompt(paused) {
            Ok(action) => action,
            Err(err) => {
                tracing::warn!(%err, "console unavailable, detaching");
                DebugAction::Disconnect
            }
        }
    }

    fn on_detached(&mut self) {
        let _ = writeln!(self.output, "Debugger detached");
    }
}
