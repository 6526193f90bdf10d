use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, error, info, warn};

use crate::config::{MachineGeometry, StreamerSettings};
use crate::error::StreamError;
use crate::gcode::filter;
use crate::gcode::transform::BeltTransformer;
use crate::serial::{Link, LinkOpener};

use super::program::{GcodeProgram, ProgramSource};

/// Where the controller is in a job's life cycle.
///
/// Transitions are only Idle -> Printing -> {Idle, or Cancelling -> Idle}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum JobState {
    Idle = 0,
    Printing = 1,
    Cancelling = 2,
}

/// How a finished job ended. Not retained past the end of the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Cancelled,
    Failed,
}

/// Point-in-time view of the controller, safe to take from any thread.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StatusSnapshot {
    #[serde(rename = "status")]
    pub state: JobState,
    #[serde(rename = "file")]
    pub program: String,
}

/// Progress events emitted by the streaming worker.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Started { program: String },
    LineSent { line: String, ack: String },
    OpenFailed { reason: String },
    Cancelling,
    Finished { outcome: JobOutcome },
}

/// State shared between the request side and the worker thread.
struct Shared {
    /// The job slot: the sole mutual-exclusion resource.
    busy: AtomicBool,
    cancel: AtomicBool,
    state: AtomicU8,
    label: Mutex<String>,
}

impl Shared {
    fn set_state(&self, state: JobState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn state(&self) -> JobState {
        match self.state.load(Ordering::Acquire) {
            1 => JobState::Printing,
            2 => JobState::Cancelling,
            _ => JobState::Idle,
        }
    }
}

/// Runs at most one streaming job at a time against the serial link.
///
/// `start` spawns a background worker and returns immediately; `cancel` and
/// `status` only touch shared flags and never block on the worker.
pub struct PrintJobController {
    shared: Arc<Shared>,
    geometry: MachineGeometry,
    settings: StreamerSettings,
    opener: Arc<dyn LinkOpener>,
    source: Arc<dyn ProgramSource>,
    events_tx: Sender<JobEvent>,
    events_rx: Receiver<JobEvent>,
}

impl PrintJobController {
    pub fn new(
        geometry: MachineGeometry,
        settings: StreamerSettings,
        opener: Arc<dyn LinkOpener>,
        source: Arc<dyn ProgramSource>,
    ) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            shared: Arc::new(Shared {
                busy: AtomicBool::new(false),
                cancel: AtomicBool::new(false),
                state: AtomicU8::new(JobState::Idle as u8),
                label: Mutex::new(String::new()),
            }),
            geometry,
            settings,
            opener,
            source,
            events_tx,
            events_rx,
        }
    }

    /// Start streaming the named program in a background worker.
    ///
    /// Fails synchronously with `ProgramNotFound` for a bad identifier and
    /// with `Busy` when the job slot is held; a losing concurrent caller
    /// gets `Busy` immediately rather than waiting.
    pub fn start(&self, program_id: &str) -> Result<(), StreamError> {
        let program = self.source.fetch(program_id)?;

        if self
            .shared
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(StreamError::Busy);
        }

        // A cancel issued while idle must not bleed into this job.
        self.shared.cancel.store(false, Ordering::Release);
        *self.shared.label.lock().unwrap() = program_id.to_string();
        self.shared.set_state(JobState::Printing);

        info!("starting job {program_id} ({} lines)", program.len());
        let shared = self.shared.clone();
        let transformer = BeltTransformer::new(self.geometry);
        let settings = self.settings.clone();
        let opener = self.opener.clone();
        let events = self.events_tx.clone();
        std::thread::spawn(move || {
            run_job(&shared, &transformer, &settings, opener, program, &events);
        });

        Ok(())
    }

    /// Request cooperative cancellation.
    ///
    /// Always succeeds, Idle included; a stale flag is cleared when the
    /// next job starts, so it cannot leak into a future job.
    pub fn cancel(&self) {
        info!("cancel requested");
        self.shared.cancel.store(true, Ordering::Release);
    }

    /// Snapshot of the current {state, program}. Never blocks on the worker.
    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.shared.state(),
            program: self.shared.label.lock().unwrap().clone(),
        }
    }

    /// Subscribe to worker progress events. The channel is unbounded, so an
    /// ignored receiver never slows the worker down.
    pub fn events(&self) -> Receiver<JobEvent> {
        self.events_rx.clone()
    }
}

/// The streaming loop. Every exit path converges on `finish`.
fn run_job(
    shared: &Shared,
    transformer: &BeltTransformer,
    settings: &StreamerSettings,
    opener: Arc<dyn LinkOpener>,
    program: GcodeProgram,
    events: &Sender<JobEvent>,
) {
    let ack_timeout = Duration::from_millis(settings.ack_timeout_ms);
    let mut link = match opener.open(&settings.port, settings.baud, ack_timeout) {
        Ok(link) => link,
        Err(e) => {
            warn!("job {} aborted, {e}", program.id());
            let _ = events.send(JobEvent::OpenFailed {
                reason: e.to_string(),
            });
            finish(shared, events, JobOutcome::Failed);
            return;
        }
    };

    let _ = events.send(JobEvent::Started {
        program: program.id().to_string(),
    });

    let outcome = match link.wake() {
        Ok(()) => stream_lines(shared, transformer, settings, link.as_mut(), &program, events),
        Err(e) => {
            error!("wake handshake failed on {}: {e}", settings.port);
            JobOutcome::Failed
        }
    };

    link.close();
    finish(shared, events, outcome);
}

fn stream_lines(
    shared: &Shared,
    transformer: &BeltTransformer,
    settings: &StreamerSettings,
    link: &mut dyn Link,
    program: &GcodeProgram,
    events: &Sender<JobEvent>,
) -> JobOutcome {
    for raw in program.lines() {
        if let Err(outcome) = send_one(transformer, link, raw, events) {
            return outcome;
        }

        // Cooperative cancellation, checked only at line boundaries.
        if shared.cancel.load(Ordering::Acquire) {
            shared.set_state(JobState::Cancelling);
            info!("cancelling job {}, parking", program.id());
            let _ = events.send(JobEvent::Cancelling);
            for cmd in &settings.park_sequence {
                if let Err(outcome) = send_one(transformer, link, cmd, events) {
                    return outcome;
                }
            }
            return JobOutcome::Cancelled;
        }
    }
    JobOutcome::Completed
}

/// Filter, transform and send one raw line; a filtered-out line is not a
/// protocol exchange at all.
fn send_one(
    transformer: &BeltTransformer,
    link: &mut dyn Link,
    raw: &str,
    events: &Sender<JobEvent>,
) -> Result<(), JobOutcome> {
    let stripped = filter::remove_comment(raw);
    if !filter::is_sendable(stripped) {
        return Ok(());
    }
    let wire = transformer.rewrite(stripped);
    match link.send_line(&wire) {
        Ok(ack) => {
            debug!("sent {wire} : {ack}");
            let _ = events.send(JobEvent::LineSent { line: wire, ack });
            Ok(())
        }
        Err(e) => {
            error!("send failed: {e}");
            Err(JobOutcome::Failed)
        }
    }
}

/// Reset to {Idle, ""}, clear the cancel flag and release the job slot.
fn finish(shared: &Shared, events: &Sender<JobEvent>, outcome: JobOutcome) {
    shared.cancel.store(false, Ordering::Release);
    *shared.label.lock().unwrap() = String::new();
    shared.set_state(JobState::Idle);
    shared.busy.store(false, Ordering::Release);
    info!("job finished: {outcome:?}");
    let _ = events.send(JobEvent::Finished { outcome });
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::Arc;

    /// Everything a mock link did, in order. "WAKE" marks the handshake.
    type Log = Arc<Mutex<Vec<String>>>;

    struct MockLink {
        log: Log,
        /// When present, each send waits for one permit from the test.
        gate: Option<Receiver<()>>,
        /// Fail the send with this index (0-based) with an ack timeout.
        fail_at: Option<usize>,
        sent: usize,
    }

    impl Link for MockLink {
        fn wake(&mut self) -> Result<(), StreamError> {
            self.log.lock().unwrap().push("WAKE".to_string());
            Ok(())
        }

        fn send_line(&mut self, line: &str) -> Result<String, StreamError> {
            if let Some(gate) = &self.gate {
                gate.recv().unwrap();
            }
            if self.fail_at == Some(self.sent) {
                return Err(StreamError::AckTimeout { waited_ms: 1 });
            }
            self.sent += 1;
            self.log.lock().unwrap().push(line.to_string());
            Ok("ok".to_string())
        }

        fn close(&mut self) {
            self.log.lock().unwrap().push("CLOSE".to_string());
        }
    }

    struct MockOpener {
        log: Log,
        gate: Option<Receiver<()>>,
        fail_at: Option<usize>,
        fail_open: bool,
    }

    impl LinkOpener for MockOpener {
        fn open(
            &self,
            port: &str,
            _baud: u32,
            _ack_timeout: Duration,
        ) -> Result<Box<dyn Link>, StreamError> {
            if self.fail_open {
                return Err(StreamError::ChannelOpen {
                    port: port.to_string(),
                    reason: "no such device".to_string(),
                });
            }
            Ok(Box::new(MockLink {
                log: self.log.clone(),
                gate: self.gate.clone(),
                fail_at: self.fail_at,
                sent: 0,
            }))
        }
    }

    struct MemSource {
        programs: HashMap<String, Vec<String>>,
    }

    impl ProgramSource for MemSource {
        fn fetch(&self, id: &str) -> Result<GcodeProgram, StreamError> {
            self.programs
                .get(id)
                .map(|lines| GcodeProgram::new(id, lines.clone()))
                .ok_or_else(|| StreamError::ProgramNotFound { id: id.to_string() })
        }
    }

    struct Rig {
        controller: PrintJobController,
        log: Log,
    }

    fn rig(lines: &[&str], park: &[&str]) -> Rig {
        rig_with(lines, park, None, None, false)
    }

    fn rig_with(
        lines: &[&str],
        park: &[&str],
        gate: Option<Receiver<()>>,
        fail_at: Option<usize>,
        fail_open: bool,
    ) -> Rig {
        let _ = env_logger::builder().is_test(true).try_init();
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let settings = StreamerSettings {
            park_sequence: park.iter().map(|s| s.to_string()).collect(),
            ..StreamerSettings::default()
        };
        let source = MemSource {
            programs: HashMap::from([(
                "art".to_string(),
                lines.iter().map(|s| s.to_string()).collect(),
            )]),
        };
        let controller = PrintJobController::new(
            MachineGeometry::default(),
            settings,
            Arc::new(MockOpener {
                log: log.clone(),
                gate,
                fail_at,
                fail_open,
            }),
            Arc::new(source),
        );
        Rig { controller, log }
    }

    fn wait_finished(events: &Receiver<JobEvent>) -> JobOutcome {
        let deadline = Duration::from_secs(5);
        loop {
            match events.recv_timeout(deadline).expect("worker stalled") {
                JobEvent::Finished { outcome } => return outcome,
                _ => {}
            }
        }
    }

    #[test]
    fn streams_whole_program_and_resets() {
        let r = rig(&["G28", "G1 X0 Y0 ; home", "; comment only", "", "M5"], &[]);
        let events = r.controller.events();
        r.controller.start("art").unwrap();
        assert_eq!(wait_finished(&events), JobOutcome::Completed);

        let log = r.log.lock().unwrap();
        assert_eq!(
            *log,
            ["WAKE", "G28", "G1 X0.000 Y0.000", "M5", "CLOSE"]
        );
        assert_eq!(
            r.controller.status(),
            StatusSnapshot {
                state: JobState::Idle,
                program: String::new(),
            }
        );
    }

    #[test]
    fn unknown_program_fails_synchronously() {
        let r = rig(&["G28"], &[]);
        match r.controller.start("nope") {
            Err(StreamError::ProgramNotFound { id }) => assert_eq!(id, "nope"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(r.controller.status().state, JobState::Idle);
    }

    #[test]
    fn second_start_while_printing_is_busy() {
        let (permit_tx, permit_rx) = unbounded();
        let r = rig_with(&["G28", "M5"], &[], Some(permit_rx), None, false);
        let events = r.controller.events();

        r.controller.start("art").unwrap();
        assert!(matches!(r.controller.start("art"), Err(StreamError::Busy)));
        assert_eq!(r.controller.status().state, JobState::Printing);
        assert_eq!(r.controller.status().program, "art");

        permit_tx.send(()).unwrap();
        permit_tx.send(()).unwrap();
        assert_eq!(wait_finished(&events), JobOutcome::Completed);
    }

    #[test]
    fn racing_starts_admit_exactly_one_winner() {
        let (permit_tx, permit_rx) = unbounded();
        let r = rig_with(&["G28"], &[], Some(permit_rx), None, false);
        let events = r.controller.events();
        let controller = Arc::new(r.controller);

        // The gated link keeps the winner's job alive until permits arrive,
        // so the loser cannot sneak in after a completed job.
        let mut handles = Vec::new();
        for _ in 0..2 {
            let c = controller.clone();
            handles.push(std::thread::spawn(move || c.start("art")));
        }
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let wins = results.iter().filter(|r| r.is_ok()).count();
        let busy = results
            .iter()
            .filter(|r| matches!(r, Err(StreamError::Busy)))
            .count();
        assert_eq!(wins, 1);
        assert_eq!(busy, 1);

        permit_tx.send(()).unwrap();
        assert_eq!(wait_finished(&events), JobOutcome::Completed);
        assert_eq!(controller.status().state, JobState::Idle);
    }

    #[test]
    fn cancel_parks_and_skips_remaining_lines() {
        let (permit_tx, permit_rx) = unbounded();
        let r = rig_with(
            &["G28", "G1 X10 Y10", "M5"],
            &["G0 X0 Y0"],
            Some(permit_rx),
            None,
            false,
        );
        let events = r.controller.events();

        r.controller.start("art").unwrap();
        r.controller.cancel();
        // First program line, then the one park line.
        permit_tx.send(()).unwrap();
        permit_tx.send(()).unwrap();

        assert_eq!(wait_finished(&events), JobOutcome::Cancelled);
        let log = r.log.lock().unwrap();
        assert_eq!(*log, ["WAKE", "G28", "G0 X0.000 Y0.000", "CLOSE"]);
        assert_eq!(r.controller.status().state, JobState::Idle);
        assert_eq!(r.controller.status().program, "");
    }

    #[test]
    fn cancel_while_idle_does_not_leak_into_next_job() {
        let r = rig(&["G28", "M5"], &["G0 X0 Y0"]);
        let events = r.controller.events();

        r.controller.cancel();
        r.controller.start("art").unwrap();
        assert_eq!(wait_finished(&events), JobOutcome::Completed);

        let log = r.log.lock().unwrap();
        assert_eq!(*log, ["WAKE", "G28", "M5", "CLOSE"]);
    }

    #[test]
    fn open_failure_releases_the_slot_without_sending() {
        let r = rig_with(&["G28"], &[], None, None, true);
        let events = r.controller.events();

        r.controller.start("art").unwrap();
        assert_eq!(wait_finished(&events), JobOutcome::Failed);
        assert!(r.log.lock().unwrap().is_empty());
        assert_eq!(r.controller.status().state, JobState::Idle);

        // The slot is free again, and the next attempt behaves the same.
        r.controller.start("art").unwrap();
        assert_eq!(wait_finished(&events), JobOutcome::Failed);
    }

    #[test]
    fn ack_timeout_aborts_without_parking() {
        let r = rig_with(&["G28", "G1 X0 Y0", "M5"], &["G0 X0 Y0"], None, Some(1), false);
        let events = r.controller.events();

        r.controller.start("art").unwrap();
        assert_eq!(wait_finished(&events), JobOutcome::Failed);

        let log = r.log.lock().unwrap();
        assert_eq!(*log, ["WAKE", "G28", "CLOSE"]);
        assert_eq!(r.controller.status().state, JobState::Idle);
    }

    #[test]
    fn restart_after_completion_succeeds() {
        let r = rig(&["G28"], &[]);
        let events = r.controller.events();

        r.controller.start("art").unwrap();
        assert_eq!(wait_finished(&events), JobOutcome::Completed);
        r.controller.start("art").unwrap();
        assert_eq!(wait_finished(&events), JobOutcome::Completed);
    }

    #[test]
    fn events_report_lines_and_acks() {
        let r = rig(&["G28"], &[]);
        let events = r.controller.events();
        r.controller.start("art").unwrap();

        let mut started = false;
        let mut line_seen = false;
        loop {
            match events.recv_timeout(Duration::from_secs(5)).unwrap() {
                JobEvent::Started { program } => {
                    assert_eq!(program, "art");
                    started = true;
                }
                JobEvent::LineSent { line, ack } => {
                    assert_eq!(line, "G28");
                    assert_eq!(ack, "ok");
                    line_seen = true;
                }
                JobEvent::Finished { outcome } => {
                    assert_eq!(outcome, JobOutcome::Completed);
                    break;
                }
                _ => {}
            }
        }
        assert!(started && line_seen);
    }

    #[test]
    fn status_serializes_like_the_wire_format() {
        let snapshot = StatusSnapshot {
            state: JobState::Idle,
            program: String::new(),
        };
        assert_eq!(
            serde_json::to_string(&snapshot).unwrap(),
            r#"{"status":"idle","file":""}"#
        );
    }
}
