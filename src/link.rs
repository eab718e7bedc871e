use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::episode::{Agent, EpisodeController, Frame, IllegalAction};
use crate::games::{GameRules, GameSettings};
use crate::protocol::{
    self, DecodeError, Dimensions, RAM_LINE_LEN, RamSnapshot, ScreenBuffer, apply_screen_diff,
    decode_ram, format_command, format_negotiation, parse_dimensions,
};

const FIFO_HELP: &str = "The emulator talks over two named pipes that must exist before launch \
(emulator output -> controller, controller -> emulator input). Create them with \
`mkfifo ale_fifo_out ale_fifo_in` in the working directory, or run the `setup` command.";

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub ale_binary: PathBuf,
    pub rom_dir: PathBuf,
    pub working_dir: PathBuf,
    /// Emulator writes frames here.
    pub fifo_out: PathBuf,
    /// Emulator reads commands from here.
    pub fifo_in: PathBuf,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            ale_binary: PathBuf::from("../ale"),
            rom_dir: PathBuf::from("."),
            working_dir: PathBuf::from("."),
            fifo_out: PathBuf::from("ale_fifo_out"),
            fifo_in: PathBuf::from("ale_fifo_in"),
        }
    }
}

impl LinkConfig {
    pub fn fifo_out_path(&self) -> PathBuf {
        self.working_dir.join(&self.fifo_out)
    }

    pub fn fifo_in_path(&self) -> PathBuf {
        self.working_dir.join(&self.fifo_in)
    }

    pub fn rom_path(&self, rom_file: &str) -> PathBuf {
        self.rom_dir.join(rom_file)
    }
}

fn debug_ram_enabled() -> bool {
    match std::env::var("ALE_DEBUG_RAM") {
        Ok(val) => matches!(val.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"),
        Err(_) => false,
    }
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("FIFO {} is unavailable: {reason}. {help}", .path.display(), help = FIFO_HELP)]
    PipeUnavailable { path: PathBuf, reason: String },
    #[error("failed to launch {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    InvalidHandshake(DecodeError),
    #[error("protocol desync at tick {tick}: {source} (line: {line:?})")]
    Protocol {
        tick: u64,
        line: String,
        #[source]
        source: DecodeError,
    },
    #[error(transparent)]
    IllegalAction(#[from] IllegalAction),
    #[error("pipe I/O failed: {0}")]
    Io(#[from] io::Error),
}

// =============================================================================
// Child Process
// =============================================================================

/// Liveness check polled before every pipe read and write.
pub trait ProcessMonitor {
    fn has_exited(&mut self) -> io::Result<bool>;
}

/// For links whose streams are not backed by a child process.
pub struct Detached;

impl ProcessMonitor for Detached {
    fn has_exited(&mut self) -> io::Result<bool> {
        Ok(false)
    }
}

/// Owns the emulator child. Dropping it kills and reaps the process.
pub struct EmulatorProcess {
    child: Child,
    reaped: bool,
}

impl EmulatorProcess {
    pub fn spawn(config: &LinkConfig, rom_file: &str) -> Result<Self, LinkError> {
        let rom = config.rom_path(rom_file);
        let child = Command::new(&config.ale_binary)
            .args(["-game_controller", "fifo"])
            .arg(&rom)
            .current_dir(&config.working_dir)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|source| LinkError::Spawn {
                program: config.ale_binary.clone(),
                source,
            })?;
        info!(pid = child.id(), rom = %rom.display(), "emulator launched");
        Ok(Self {
            child,
            reaped: false,
        })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Waits for the child if it is already exiting, otherwise kills it.
    pub fn shutdown(mut self) -> io::Result<ExitStatus> {
        let status = match self.child.try_wait()? {
            Some(status) => status,
            None => {
                let _ = self.child.kill();
                self.child.wait()?
            }
        };
        self.reaped = true;
        Ok(status)
    }
}

impl ProcessMonitor for EmulatorProcess {
    fn has_exited(&mut self) -> io::Result<bool> {
        Ok(self.child.try_wait()?.is_some())
    }
}

impl Drop for EmulatorProcess {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

// =============================================================================
// FIFOs
// =============================================================================

pub fn check_fifo(path: &Path) -> Result<(), LinkError> {
    let meta = std::fs::metadata(path).map_err(|e| LinkError::PipeUnavailable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        if !meta.file_type().is_fifo() {
            return Err(LinkError::PipeUnavailable {
                path: path.to_path_buf(),
                reason: "not a named pipe".to_string(),
            });
        }
    }
    #[cfg(not(unix))]
    let _ = meta;
    Ok(())
}

/// Creates whichever of the two FIFOs is missing. Returns the created paths.
pub fn prepare_fifos(config: &LinkConfig) -> Result<Vec<PathBuf>, LinkError> {
    let mut created = Vec::new();
    for path in [config.fifo_out_path(), config.fifo_in_path()] {
        if path.exists() {
            check_fifo(&path)?;
            continue;
        }
        let status = Command::new("mkfifo")
            .arg(&path)
            .status()
            .map_err(|source| LinkError::Spawn {
                program: PathBuf::from("mkfifo"),
                source,
            })?;
        if !status.success() {
            return Err(LinkError::PipeUnavailable {
                path,
                reason: format!("mkfifo failed: {status}"),
            });
        }
        info!(path = %path.display(), "created FIFO");
        created.push(path);
    }
    Ok(created)
}

// =============================================================================
// Emulator Link
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Starting,
    Handshaking,
    Streaming,
    Closed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ChildExited,
    EndOfStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub ticks: u64,
    pub dimensions: Dimensions,
    pub close_reason: CloseReason,
}

pub struct EmulatorLink<R, W, P> {
    reader: R,
    writer: W,
    process: P,
    state: LinkState,
    dimensions: Option<Dimensions>,
    wants_ram: bool,
    screen: Option<ScreenBuffer>,
    ram: Option<RamSnapshot>,
    ticks: u64,
    line: Vec<u8>,
    debug_ram: bool,
}

impl EmulatorLink<BufReader<File>, BufWriter<File>, EmulatorProcess> {
    /// Spawns the emulator for `settings.rom_file` and opens both FIFOs.
    /// The output FIFO is opened first; both opens block until the emulator
    /// opens its ends.
    pub fn launch(config: &LinkConfig, settings: &GameSettings) -> Result<Self, LinkError> {
        let out_path = config.fifo_out_path();
        let in_path = config.fifo_in_path();
        check_fifo(&out_path)?;
        check_fifo(&in_path)?;

        let process = EmulatorProcess::spawn(config, &settings.rom_file)?;
        let open_err = |path: &Path| {
            let path = path.to_path_buf();
            move |e: io::Error| LinkError::PipeUnavailable {
                path,
                reason: e.to_string(),
            }
        };
        let reader = File::open(&out_path).map_err(open_err(&out_path))?;
        let writer = OpenOptions::new()
            .write(true)
            .open(&in_path)
            .map_err(open_err(&in_path))?;
        debug!(out = %out_path.display(), input = %in_path.display(), "FIFOs open");

        Ok(Self::new(
            BufReader::new(reader),
            BufWriter::new(writer),
            process,
        ))
    }
}

impl<R: BufRead, W: Write, P: ProcessMonitor> EmulatorLink<R, W, P> {
    pub fn new(reader: R, writer: W, process: P) -> Self {
        Self {
            reader,
            writer,
            process,
            state: LinkState::Starting,
            dimensions: None,
            wants_ram: false,
            screen: None,
            ram: None,
            ticks: 0,
            line: Vec::new(),
            debug_ram: debug_ram_enabled(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn screen(&self) -> Option<&ScreenBuffer> {
        self.screen.as_ref()
    }

    pub fn ram(&self) -> Option<&RamSnapshot> {
        self.ram.as_ref()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn into_parts(self) -> (R, W, P) {
        (self.reader, self.writer, self.process)
    }

    /// Reads the screen size and answers with what this session wants.
    pub fn handshake(&mut self, settings: &GameSettings) -> Result<Dimensions, LinkError> {
        self.state = LinkState::Handshaking;
        match self.negotiate(settings) {
            Ok(dims) => {
                self.state = LinkState::Streaming;
                Ok(dims)
            }
            Err(e) => {
                self.state = LinkState::Failed;
                Err(e)
            }
        }
    }

    fn negotiate(&mut self, settings: &GameSettings) -> Result<Dimensions, LinkError> {
        self.line.clear();
        self.reader.read_until(b'\n', &mut self.line)?;
        let text = String::from_utf8_lossy(&self.line);
        let dims = parse_dimensions(&text).map_err(LinkError::InvalidHandshake)?;

        self.writer.write_all(
            format_negotiation(settings.wants_screen, settings.wants_ram, settings.frame_skip)
                .as_bytes(),
        )?;
        self.writer.flush()?;

        self.dimensions = Some(dims);
        self.wants_ram = settings.wants_ram;
        self.screen = settings.wants_screen.then(|| ScreenBuffer::new(dims));
        info!(
            %dims,
            screen = settings.wants_screen,
            ram = settings.wants_ram,
            frame_skip = settings.frame_skip,
            "handshake complete"
        );
        Ok(dims)
    }

    /// Handshakes if needed, then serves ticks until the emulator goes away.
    pub fn run<G, A>(
        &mut self,
        controller: &mut EpisodeController<G>,
        agent: &mut A,
    ) -> Result<SessionSummary, LinkError>
    where
        G: GameRules,
        A: Agent + ?Sized,
    {
        let dimensions = match (self.state, self.dimensions) {
            (LinkState::Streaming, Some(dims)) => dims,
            _ => self.handshake(controller.rules().settings())?,
        };

        loop {
            match self.step(controller, agent) {
                Ok(None) => {}
                Ok(Some(close_reason)) => {
                    self.state = LinkState::Closed;
                    info!(ticks = self.ticks, ?close_reason, "session closed");
                    return Ok(SessionSummary {
                        ticks: self.ticks,
                        dimensions,
                        close_reason,
                    });
                }
                Err(e) => {
                    self.state = LinkState::Failed;
                    warn!(ticks = self.ticks, error = %e, "session failed");
                    return Err(e);
                }
            }
        }
    }

    fn step<G, A>(
        &mut self,
        controller: &mut EpisodeController<G>,
        agent: &mut A,
    ) -> Result<Option<CloseReason>, LinkError>
    where
        G: GameRules,
        A: Agent + ?Sized,
    {
        if self.process.has_exited()? {
            return Ok(Some(CloseReason::ChildExited));
        }
        self.line.clear();
        if self.reader.read_until(b'\n', &mut self.line)? == 0 {
            return Ok(Some(if self.process.has_exited()? {
                CloseReason::ChildExited
            } else {
                CloseReason::EndOfStream
            }));
        }

        let tick = self.ticks;
        let decoded = std::str::from_utf8(&self.line)
            .map_err(|e| DecodeError::NotUtf8(e.to_string()))
            .and_then(|line| decode_tick(line, self.wants_ram, self.screen.as_mut()));
        match decoded {
            Ok(Some(ram)) => {
                if self.debug_ram {
                    debug!(tick, "ram:\n{}", protocol::format_ram(&ram));
                }
                self.ram = Some(ram);
            }
            Ok(None) => {}
            Err(source) => {
                return Err(LinkError::Protocol {
                    tick,
                    line: String::from_utf8_lossy(&self.line).trim_end().to_string(),
                    source,
                });
            }
        }

        let frame = Frame {
            screen: self.screen.as_ref(),
            ram: self.ram.as_ref(),
            tick,
        };
        let action = controller.tick(&frame, None, agent)?;

        if self.process.has_exited()? {
            return Ok(Some(CloseReason::ChildExited));
        }
        self.writer.write_all(format_command(action).as_bytes())?;
        self.writer.flush()?;
        self.ticks += 1;
        Ok(None)
    }
}

/// Splits one tick line into its RAM block and screen diff and decodes both.
fn decode_tick(
    line: &str,
    wants_ram: bool,
    screen: Option<&mut ScreenBuffer>,
) -> Result<Option<RamSnapshot>, DecodeError> {
    let (ram, rest) = if wants_ram {
        let block = line.get(..RAM_LINE_LEN).ok_or_else(|| {
            DecodeError::MalformedRam(format!(
                "line holds {} characters, RAM block needs {RAM_LINE_LEN}",
                line.len()
            ))
        })?;
        (Some(decode_ram(block)?), &line[RAM_LINE_LEN..])
    } else {
        (None, line)
    };

    // Without a screen buffer the diff segment ("NADA") is ignored.
    if let Some(screen) = screen {
        apply_screen_diff(screen, rest)?;
    }
    Ok(ram)
}
