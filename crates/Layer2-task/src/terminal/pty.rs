//! PTY terminal backend
//!
//! Runs task processes inside a pseudo-terminal using portable-pty. Output is
//! split into lines, stripped of escape sequences and published both as
//! [`TerminalEvent::Line`] and on the service wide output stream.
//!
//! A terminal hosts one process at a time; `reuse_terminal` starts the next
//! one once the previous has exited.

use super::{
    CreateTerminalRequest, ExitReason, ReconnectionProperties, RevealTarget, ShellLaunchConfig, ShellProfile,
    Terminal, TerminalEvent, TerminalId, TerminalService, WaitOnExit,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::collections::VecDeque;
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use termtask_foundation::{Error, Platform, Result, TerminalConfig};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 4096;
const OUTPUT_CAPACITY: usize = 1000;

/// Time allowed for buffered output to drain after the process exited
const DRAIN_TIMEOUT: Duration = Duration::from_millis(200);

/// Output line tagged with the terminal it came from
pub type TerminalOutput = (TerminalId, String);

fn strip_ansi(input: &[u8]) -> String {
    String::from_utf8_lossy(&strip_ansi_escapes::strip(input)).into_owned()
}

// ============================================================================
// PtyTerminal
// ============================================================================

struct ProcessState {
    config: ShellLaunchConfig,
    process_id: Option<u32>,
    killer: Option<Box<dyn ChildKiller + Send + Sync>>,
    master: Option<Box<dyn MasterPty + Send>>,
    kill_requested: Arc<AtomicBool>,
    exit_reason: Option<ExitReason>,
    /// A custom execution is waiting for its provider to complete it
    custom_pending: bool,
}

pub struct PtyTerminal {
    id: TerminalId,
    this: Weak<PtyTerminal>,
    settings: TerminalConfig,
    events: broadcast::Sender<TerminalEvent>,
    /// Receiver created with the channel, handed to the first subscriber
    primordial: Mutex<Option<broadcast::Receiver<TerminalEvent>>>,
    state: Mutex<ProcessState>,
    scrollback: Mutex<VecDeque<String>>,
    disposed: AtomicBool,
    output: broadcast::Sender<TerminalOutput>,
}

impl PtyTerminal {
    fn new(
        id: TerminalId,
        settings: TerminalConfig,
        config: ShellLaunchConfig,
        output: broadcast::Sender<TerminalOutput>,
    ) -> Arc<Self> {
        let (events, primordial) = broadcast::channel(EVENT_CAPACITY);
        Arc::new_cyclic(|this| Self {
            id,
            this: this.clone(),
            settings,
            events,
            primordial: Mutex::new(Some(primordial)),
            state: Mutex::new(ProcessState {
                config,
                process_id: None,
                killer: None,
                master: None,
                kill_requested: Arc::new(AtomicBool::new(false)),
                exit_reason: None,
                custom_pending: false,
            }),
            scrollback: Mutex::new(VecDeque::new()),
            disposed: AtomicBool::new(false),
            output,
        })
    }

    fn push_line(&self, line: String) {
        {
            let mut scrollback = self.scrollback.lock();
            scrollback.push_back(line.clone());
            while scrollback.len() > self.settings.scrollback_lines {
                scrollback.pop_front();
            }
        }
        let _ = self.output.send((self.id, line));
    }

    /// Echo text goes to the scrollback only, never to problem matching
    fn write_text(&self, text: &str) {
        for line in text.split('\n') {
            let line = strip_ansi(line.trim_end_matches('\r').as_bytes());
            if !line.trim().is_empty() {
                self.push_line(line);
            }
        }
    }

    /// Spawn the process described by the current launch config
    fn launch(&self) -> Result<()> {
        let terminal = self
            .this
            .upgrade()
            .ok_or(Error::TerminalDisposed(self.id))?;
        let config = self.state.lock().config.clone();
        if let Some(text) = &config.initial_text {
            self.write_text(text);
        }
        if config.custom_execution {
            let mut state = self.state.lock();
            state.custom_pending = true;
            state.exit_reason = None;
            debug!("Terminal {} waits for a custom execution", self.id);
            return Ok(());
        }

        let executable = config
            .executable
            .clone()
            .or_else(|| self.settings.default_shell.clone())
            .unwrap_or_else(|| Platform::detect().default_shell());

        let size = PtySize {
            rows: self.settings.rows,
            cols: self.settings.cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        let pty = native_pty_system()
            .openpty(size)
            .map_err(|e| Error::Terminal(format!("Failed to open PTY: {}", e)))?;

        let mut cmd = CommandBuilder::new(&executable);
        for arg in config.args.to_vec() {
            cmd.arg(arg);
        }
        if let Some(cwd) = &config.cwd {
            cmd.cwd(cwd);
        }
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        info!("Terminal {} spawning {} {}", self.id, executable, config.args.display());
        let mut child = pty
            .slave
            .spawn_command(cmd)
            .map_err(|e| Error::Terminal(format!("Failed to spawn PTY command: {}", e)))?;
        // The slave must close in this process or the reader never sees EOF
        drop(pty.slave);

        let reader = pty
            .master
            .try_clone_reader()
            .map_err(|e| Error::Terminal(format!("Failed to clone PTY reader: {}", e)))?;

        let kill_requested = Arc::new(AtomicBool::new(false));
        {
            let mut state = self.state.lock();
            state.process_id = child.process_id();
            state.killer = Some(child.clone_killer());
            state.master = Some(pty.master);
            state.kill_requested = Arc::clone(&kill_requested);
            state.exit_reason = None;
        }

        let (tx, rx) = mpsc::channel::<Vec<u8>>(100);
        let reader_flag = Arc::clone(&kill_requested);
        tokio::task::spawn_blocking(move || read_loop(reader, tx, reader_flag));
        let waiter = tokio::task::spawn_blocking(move || child.wait());

        tokio::spawn(async move {
            terminal.pump(rx, waiter, kill_requested).await;
        });
        Ok(())
    }

    async fn pump(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<Vec<u8>>,
        waiter: tokio::task::JoinHandle<std::io::Result<portable_pty::ExitStatus>>,
        kill_requested: Arc<AtomicBool>,
    ) {
        let mut pending: Vec<u8> = Vec::new();
        tokio::pin!(waiter);

        let status = loop {
            tokio::select! {
                chunk = rx.recv() => match chunk {
                    Some(data) => self.feed(&mut pending, &data),
                    None => break (&mut waiter).await,
                },
                status = &mut waiter => {
                    while let Ok(Some(data)) = tokio::time::timeout(DRAIN_TIMEOUT, rx.recv()).await {
                        self.feed(&mut pending, &data);
                    }
                    break status;
                }
            }
        };
        if !pending.is_empty() {
            let line = strip_ansi(&pending);
            self.emit_line(line);
        }

        let exit_code = match status {
            Ok(Ok(status)) if !kill_requested.load(Ordering::SeqCst) => Some(status.exit_code() as i32),
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                warn!("Terminal {} failed waiting for its process: {}", self.id, e);
                None
            }
            Err(e) => {
                warn!("Terminal {} waiter panicked: {}", self.id, e);
                None
            }
        };
        debug!("Terminal {} process exited with {:?}", self.id, exit_code);
        self.finish(exit_code);
    }

    /// Publish the exit and apply the wait-on-exit behavior
    fn finish(&self, exit_code: Option<i32>) {
        let wait_on_exit = {
            let mut state = self.state.lock();
            state.killer = None;
            state.process_id = None;
            state.custom_pending = false;
            if state.exit_reason.is_none() {
                state.exit_reason = Some(ExitReason::Process);
            }
            state.config.wait_on_exit.clone()
        };
        let _ = self.events.send(TerminalEvent::Exit(exit_code));

        match wait_on_exit {
            WaitOnExit::Close => self.dispose(),
            WaitOnExit::Wait => {}
            message @ WaitOnExit::Message(_) => {
                if let Some(text) = message.render(exit_code.unwrap_or(0)) {
                    self.write_text(&text);
                }
            }
        }
    }

    fn feed(&self, pending: &mut Vec<u8>, data: &[u8]) {
        pending.extend_from_slice(data);
        while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = pending.drain(..=pos).collect();
            let raw = &raw[..raw.len() - 1];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            self.emit_line(strip_ansi(raw));
        }
    }

    fn emit_line(&self, line: String) {
        self.push_line(line.clone());
        let _ = self.events.send(TerminalEvent::Line(line));
    }
}

fn read_loop(mut reader: Box<dyn Read + Send>, tx: mpsc::Sender<Vec<u8>>, kill_requested: Arc<AtomicBool>) {
    let mut buf = [0u8; 4096];
    loop {
        if kill_requested.load(Ordering::SeqCst) {
            break;
        }
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.blocking_send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) => {
                if e.kind() == std::io::ErrorKind::WouldBlock {
                    std::thread::sleep(Duration::from_millis(10));
                    continue;
                }
                // EIO once the child side closed
                break;
            }
        }
    }
}

#[async_trait]
impl Terminal for PtyTerminal {
    fn instance_id(&self) -> TerminalId {
        self.id
    }

    fn process_id(&self) -> Option<u32> {
        self.state.lock().process_id
    }

    fn subscribe(&self) -> broadcast::Receiver<TerminalEvent> {
        self.primordial
            .lock()
            .take()
            .unwrap_or_else(|| self.events.subscribe())
    }

    async fn process_ready(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::TerminalDisposed(self.id));
        }
        Ok(())
    }

    async fn reuse_terminal(&self, config: ShellLaunchConfig) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::TerminalDisposed(self.id));
        }
        {
            let mut state = self.state.lock();
            if state.killer.is_some() || state.custom_pending {
                return Err(Error::Terminal(format!("Terminal {} is still running a process", self.id)));
            }
            state.config = config;
        }
        self.launch()
    }

    fn complete_custom_execution(&self, exit_code: i32) -> Result<()> {
        if self.is_disposed() {
            return Err(Error::TerminalDisposed(self.id));
        }
        if !self.state.lock().custom_pending {
            return Err(Error::Terminal(format!(
                "Terminal {} has no pending custom execution",
                self.id
            )));
        }
        self.finish(Some(exit_code));
        Ok(())
    }

    fn clear_buffer(&self) {
        self.scrollback.lock().clear();
    }

    fn buffer_lines(&self) -> Vec<String> {
        self.scrollback.lock().iter().cloned().collect()
    }

    fn shell_launch_config(&self) -> ShellLaunchConfig {
        self.state.lock().config.clone()
    }

    fn set_reconnection_properties(&self, properties: Option<ReconnectionProperties>) {
        self.state.lock().config.reconnection_properties = properties;
    }

    fn set_wait_on_exit(&self, wait_on_exit: WaitOnExit) {
        self.state.lock().config.wait_on_exit = wait_on_exit;
    }

    fn exit_reason(&self) -> Option<ExitReason> {
        self.state.lock().exit_reason
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut state = self.state.lock();
            if state.exit_reason.is_none() {
                state.exit_reason = Some(ExitReason::User);
            }
            state.kill_requested.store(true, Ordering::SeqCst);
            if let Some(mut killer) = state.killer.take() {
                if let Err(e) = killer.kill() {
                    debug!("Terminal {} kill failed: {}", self.id, e);
                }
            }
            state.master = None;
            state.custom_pending = false;
        }
        info!("Terminal {} disposed", self.id);
        let _ = self.events.send(TerminalEvent::Disposed);
    }
}

// ============================================================================
// PtyTerminalService
// ============================================================================

pub struct PtyTerminalService {
    settings: TerminalConfig,
    next_id: AtomicU32,
    terminals: Mutex<Vec<Arc<PtyTerminal>>>,
    output: broadcast::Sender<TerminalOutput>,
}

impl PtyTerminalService {
    pub fn new(settings: TerminalConfig) -> Self {
        let (output, _) = broadcast::channel(OUTPUT_CAPACITY);
        Self {
            settings,
            next_id: AtomicU32::new(1),
            terminals: Mutex::new(Vec::new()),
            output,
        }
    }

    /// Every line written to any terminal of this service
    pub fn subscribe_output(&self) -> broadcast::Receiver<TerminalOutput> {
        self.output.subscribe()
    }

    pub fn dispose_all(&self) {
        let terminals: Vec<_> = self.terminals.lock().drain(..).collect();
        for terminal in terminals {
            terminal.dispose();
        }
    }
}

impl Default for PtyTerminalService {
    fn default() -> Self {
        Self::new(TerminalConfig::default())
    }
}

#[async_trait]
impl TerminalService for PtyTerminalService {
    async fn create_terminal(&self, request: CreateTerminalRequest) -> Result<Arc<dyn Terminal>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if let Some(parent) = request.parent {
            debug!("Terminal {} opens next to terminal {}", id, parent);
        }
        let terminal = PtyTerminal::new(id, self.settings.clone(), request.config, self.output.clone());
        terminal.launch()?;
        {
            let mut terminals = self.terminals.lock();
            terminals.retain(|t| !t.is_disposed());
            terminals.push(Arc::clone(&terminal));
        }
        Ok(terminal)
    }

    fn instances(&self) -> Vec<Arc<dyn Terminal>> {
        self.terminals
            .lock()
            .iter()
            .filter(|t| !t.is_disposed())
            .map(|t| Arc::clone(t) as Arc<dyn Terminal>)
            .collect()
    }

    fn default_profile(&self, platform: Platform) -> ShellProfile {
        ShellProfile {
            path: self
                .settings
                .default_shell
                .clone()
                .unwrap_or_else(|| platform.default_shell()),
            args: self.settings.default_shell_args.clone(),
            ..Default::default()
        }
    }

    fn reveal(&self, terminal: &Arc<dyn Terminal>, target: RevealTarget) {
        match target {
            RevealTarget::Problems => info!("Problems reported in terminal {}", terminal.instance_id()),
            RevealTarget::Terminal { focus } => {
                info!("Showing terminal {}{}", terminal.instance_id(), if focus { " (focused)" } else { "" })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi(b"\x1b[32mgreen\x1b[0m text"), "green text");
    }

    #[test]
    fn test_feed_splits_lines() {
        let (output, mut rx) = broadcast::channel(16);
        let terminal = PtyTerminal::new(1, TerminalConfig::default(), ShellLaunchConfig::default(), output);
        let mut events = terminal.subscribe();
        let mut pending = Vec::new();
        terminal.feed(&mut pending, b"one\r\ntw");
        terminal.feed(&mut pending, b"o\nthree");
        assert_eq!(pending, b"three");
        assert_eq!(events.try_recv().unwrap(), TerminalEvent::Line("one".into()));
        assert_eq!(events.try_recv().unwrap(), TerminalEvent::Line("two".into()));
        assert_eq!(rx.try_recv().unwrap(), (1, "one".to_string()));
        assert_eq!(terminal.buffer_lines(), vec!["one", "two"]);
    }

    #[test]
    fn test_scrollback_is_bounded() {
        let (output, _) = broadcast::channel(16);
        let settings = TerminalConfig {
            scrollback_lines: 2,
            ..Default::default()
        };
        let terminal = PtyTerminal::new(1, settings, ShellLaunchConfig::default(), output);
        let mut pending = Vec::new();
        terminal.feed(&mut pending, b"a\nb\nc\n");
        assert_eq!(terminal.buffer_lines(), vec!["b", "c"]);
        terminal.clear_buffer();
        assert!(terminal.buffer_lines().is_empty());
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let (output, _) = broadcast::channel(16);
        let terminal = PtyTerminal::new(3, TerminalConfig::default(), ShellLaunchConfig::default(), output);
        let mut events = terminal.subscribe();
        terminal.dispose();
        terminal.dispose();
        assert!(terminal.is_disposed());
        assert_eq!(terminal.exit_reason(), Some(ExitReason::User));
        assert_eq!(events.try_recv().unwrap(), TerminalEvent::Disposed);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_custom_execution_completes_on_request() {
        let (output, _) = broadcast::channel(16);
        let config = ShellLaunchConfig {
            custom_execution: true,
            wait_on_exit: WaitOnExit::Wait,
            initial_text: Some("Executing task: provided".into()),
            ..Default::default()
        };
        let terminal = PtyTerminal::new(4, TerminalConfig::default(), config, output);
        let mut events = terminal.subscribe();
        terminal.launch().unwrap();
        assert_eq!(terminal.buffer_lines(), vec!["Executing task: provided"]);
        assert!(terminal.reuse_terminal(ShellLaunchConfig::default()).await.is_err());

        terminal.complete_custom_execution(3).unwrap();
        assert_eq!(events.try_recv().unwrap(), TerminalEvent::Exit(Some(3)));
        assert_eq!(terminal.exit_reason(), Some(ExitReason::Process));
        assert!(terminal.complete_custom_execution(0).is_err());
    }

    #[test]
    fn test_default_profile_prefers_configured_shell() {
        let settings = TerminalConfig {
            default_shell: Some("/bin/zsh".into()),
            default_shell_args: vec!["-l".into()],
            ..Default::default()
        };
        let service = PtyTerminalService::new(settings);
        let profile = service.default_profile(Platform::Linux);
        assert_eq!(profile.path, "/bin/zsh");
        assert_eq!(profile.args, vec!["-l"]);
    }
}
