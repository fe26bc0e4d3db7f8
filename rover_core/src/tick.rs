//! The 50 Hz control loop.
//!
//! Each tick, in order: drain worker envelopes, advance the conversation
//! machine, snapshot MCU telemetry, run edge detection, run the mode
//! state machine, pick a twist, apply the safety cascade, emit MCU
//! outputs (including the face composition pipeline), dispatch scheduled
//! actions and policy speech, request plans, and broadcast telemetry.
//!
//! All state is owned here; I/O tasks communicate through channels. A
//! tick never blocks on network or disk: sends are queue pushes and the
//! end-of-tick sleep absorbs jitter (an overrun proceeds immediately).

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{info, warn};

use rover_common::config::SupervisorConfig;
use rover_common::envelope::Envelope;
use rover_common::messages as msg;
use rover_common::state::{Mode, Twist};
use rover_common::time::mono_ms;
use rover_mcu::face::{FaceClient, FaceInput};
use rover_mcu::motion::MotionClient;
use rover_mcu::transport::TransportEvent;
use rover_proto::types::{
    ButtonEventType, FaceButtonId, FaceConvState, FaceFlags, FaceGesture, FaceMood, FaceSystemMode,
    Fault,
};
use rover_workers::{WorkerEvent, WorkerSupervisor};

use crate::behavior::BehaviorEngine;
use crate::choreography::{ConvChoreographer, TransitionAction};
use crate::conversation::{ConvStateTracker, GAZE_SEND_SCALE};
use crate::events::EventBus;
use crate::expressions::{emotion_to_mood, gesture_to_id};
use crate::guardrails::Guardrails;
use crate::mood::MoodSequencer;
use crate::plan::{Action, ActionScheduler};
use crate::router::EventRouter;
use crate::safety::SafetyGate;
use crate::skills::{Skill, SkillExecutor};
use crate::speech::SpeechPolicy;
use crate::state::{RobotState, WorldState};

/// Personality snapshot staleness bound for the face pipeline.
const PE_STALE_MS: f64 = 3000.0;

/// Ticks of talking animation kept alive after TTS finishes, covering
/// OS/hardware audio buffer drain (~300 ms at 50 Hz).
const POST_TALKING_GRACE_TICKS: u32 = 15;

/// ACTION-button greet debounce.
const GREET_DEBOUNCE_MS: f64 = 5000.0;

/// Interval between plan requests to the AI worker.
const PLAN_PERIOD_MS: f64 = 5000.0;

/// Battery fill range for the LOW_BATTERY overlay (2S pack).
const BATTERY_EMPTY_MV: f64 = 6000.0;
const BATTERY_FULL_MV: f64 = 8400.0;

/// External control requests served between ticks.
pub enum CoreCommand {
    SetTeleopTwist { v_mm_s: i16, w_mrad_s: i16 },
    RequestMode { target: Mode, reply: oneshot::Sender<Result<(), String>> },
    ClearError { reply: oneshot::Sender<Result<(), String>> },
    SetVisionPolicy(crate::safety::VisionPolicy),
    Shutdown,
}

/// Cloneable handle for the control surface.
#[derive(Clone)]
pub struct CoreHandle {
    tx: mpsc::UnboundedSender<CoreCommand>,
}

impl CoreHandle {
    pub fn set_teleop_twist(&self, v_mm_s: i16, w_mrad_s: i16) {
        let _ = self.tx.send(CoreCommand::SetTeleopTwist { v_mm_s, w_mrad_s });
    }

    pub async fn request_mode(&self, target: Mode) -> Result<(), String> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CoreCommand::RequestMode { target, reply })
            .map_err(|_| "core stopped".to_string())?;
        rx.await.map_err(|_| "core stopped".to_string())?
    }

    pub async fn clear_error(&self) -> Result<(), String> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CoreCommand::ClearError { reply })
            .map_err(|_| "core stopped".to_string())?;
        rx.await.map_err(|_| "core stopped".to_string())?
    }

    /// Apply new vision speed-cap thresholds on the next tick.
    pub fn set_vision_policy(&self, policy: crate::safety::VisionPolicy) {
        let _ = self.tx.send(CoreCommand::SetVisionPolicy(policy));
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(CoreCommand::Shutdown);
    }
}

/// Everything the tick loop drives, owned in one place.
pub struct TickLoop {
    // Rates and thresholds
    tick_period: Duration,
    telem_every_n: u32,
    low_battery_mv: u16,
    robot_id: String,

    // I/O
    motion: Option<MotionClient>,
    motion_events: Option<broadcast::Receiver<TransportEvent>>,
    face: Option<FaceClient>,
    face_events: Option<broadcast::Receiver<TransportEvent>>,
    motion_clock: Option<Arc<parking_lot::Mutex<rover_common::state::ClockSyncState>>>,
    face_clock: Option<Arc<parking_lot::Mutex<rover_common::state::ClockSyncState>>>,
    workers: Arc<WorkerSupervisor>,
    worker_events: mpsc::UnboundedReceiver<WorkerEvent>,
    commands: mpsc::UnboundedReceiver<CoreCommand>,
    handle_tx: mpsc::UnboundedSender<CoreCommand>,
    on_telemetry: Option<Box<dyn Fn(Value) + Send>>,

    // State
    pub robot: RobotState,
    pub world: WorldState,

    // Subsystems
    mode_sm: crate::mode::ModeStateMachine,
    event_bus: EventBus,
    behavior: BehaviorEngine,
    safety: SafetyGate,
    pub scheduler: ActionScheduler,
    router: EventRouter,
    speech_policy: SpeechPolicy,
    pub conv: ConvStateTracker,
    mood_seq: MoodSequencer,
    guardrails: Guardrails,
    choreo: ConvChoreographer,

    // Tick state
    tick_seq: u64,
    telem_counter: u32,
    running: bool,
    talking_grace_ticks: u32,

    // Conversation face buffers
    conversation_emotion: String,
    conversation_intensity: f32,
    conversation_gestures: Vec<String>,
    queued_emotion: String,
    queued_intensity: f32,

    // Face output edge state
    face_flags_sent: bool,
    last_face_system: Option<(u8, u8)>,

    // Personality event forwarding edges
    pe_boot_sent: bool,
    pe_low_battery_sent: bool,
    pe_prev_faults: Fault,

    // Greet debounce and plan cadence
    last_greet_ms: f64,
    last_plan_request_ms: f64,
    pending_end_conversation_at_ms: Option<f64>,
}

impl TickLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &SupervisorConfig,
        motion: Option<MotionClient>,
        face: Option<FaceClient>,
        motion_events: Option<broadcast::Receiver<TransportEvent>>,
        face_events: Option<broadcast::Receiver<TransportEvent>>,
        motion_clock: Option<Arc<parking_lot::Mutex<rover_common::state::ClockSyncState>>>,
        face_clock: Option<Arc<parking_lot::Mutex<rover_common::state::ClockSyncState>>>,
        workers: Arc<WorkerSupervisor>,
        worker_events: mpsc::UnboundedReceiver<WorkerEvent>,
    ) -> Self {
        let (handle_tx, commands) = mpsc::unbounded_channel();
        let mut world = WorldState::default();
        world.planner_enabled = config.planner.enabled;

        Self {
            tick_period: Duration::from_secs_f64(1.0 / f64::from(config.control.tick_hz)),
            telem_every_n: (config.control.tick_hz / config.control.telemetry_hz).max(1),
            low_battery_mv: config.control.low_battery_mv,
            robot_id: config.planner.robot_id.clone(),
            motion,
            motion_events,
            face,
            face_events,
            motion_clock,
            face_clock,
            workers,
            worker_events,
            commands,
            handle_tx,
            on_telemetry: None,
            robot: RobotState::default(),
            world,
            mode_sm: crate::mode::ModeStateMachine::new(),
            event_bus: EventBus::default(),
            behavior: BehaviorEngine::new(SkillExecutor::default()),
            safety: SafetyGate::new(crate::safety::VisionPolicy {
                stale_ms: config.safety.vision_stale_ms,
                clear_low: config.safety.vision_clear_low as f32,
                clear_high: config.safety.vision_clear_high as f32,
            }),
            scheduler: ActionScheduler::new(),
            router: EventRouter::new(),
            speech_policy: SpeechPolicy::new(),
            conv: ConvStateTracker::new(),
            mood_seq: MoodSequencer::new(),
            guardrails: Guardrails::new(),
            choreo: ConvChoreographer::new(),
            tick_seq: 0,
            telem_counter: 0,
            running: false,
            talking_grace_ticks: 0,
            conversation_emotion: String::new(),
            conversation_intensity: 0.0,
            conversation_gestures: Vec::new(),
            queued_emotion: String::new(),
            queued_intensity: 0.0,
            face_flags_sent: false,
            last_face_system: None,
            pe_boot_sent: false,
            pe_low_battery_sent: false,
            pe_prev_faults: Fault::empty(),
            last_greet_ms: -GREET_DEBOUNCE_MS,
            last_plan_request_ms: 0.0,
            pending_end_conversation_at_ms: None,
        }
    }

    pub fn handle(&self) -> CoreHandle {
        CoreHandle { tx: self.handle_tx.clone() }
    }

    /// Register the telemetry fan-out (dashboard boundary; optional).
    pub fn on_telemetry(&mut self, cb: impl Fn(Value) + Send + 'static) {
        self.on_telemetry = Some(Box::new(cb));
    }

    /// Reconfigure the safety gate's vision thresholds at runtime.
    pub fn configure_vision_policy(&mut self, policy: crate::safety::VisionPolicy) {
        self.safety.configure_vision(policy);
    }

    /// Run the loop until shutdown.
    pub async fn run(&mut self) {
        self.running = true;
        let mut t_prev = mono_ms();
        info!(
            "tick loop started at {} Hz",
            (1.0 / self.tick_period.as_secs_f64()).round()
        );

        while self.running {
            let t0 = mono_ms();
            let dt_ms = t0 - t_prev;
            t_prev = t0;

            self.tick_at(t0, dt_ms).await;

            let elapsed = mono_ms() - t0;
            let budget = self.tick_period.as_secs_f64() * 1000.0;
            if elapsed < budget {
                tokio::time::sleep(Duration::from_secs_f64((budget - elapsed) / 1000.0)).await;
            }
        }
        info!("tick loop stopped");
    }

    /// One tick at an explicit time; `run` calls this with the live
    /// clock, tests drive it directly.
    pub async fn tick_at(&mut self, now_ms: f64, dt_ms: f64) {
        self.tick_seq += 1;
        self.robot.tick_mono_ms = now_ms;
        self.robot.tick_dt_ms = dt_ms;

        // 0. Control surface commands.
        self.drain_commands();

        // 1. Drain worker envelopes through the router + conversation
        //    handler.
        while let Ok((worker, env)) = self.worker_events.try_recv() {
            self.router
                .route(&worker, &env, &mut self.world, &mut self.scheduler, now_ms);
            self.handle_conversation_event(&env).await;
        }
        self.world.active_skill = self.scheduler.active_skill;

        // 1b. Conversation auto-transitions and backchannel.
        self.conv.update(dt_ms);
        self.robot.face_conv_state = self.conv.state as u8;
        self.robot.face_conv_timer_ms = self.conv.timer_ms;
        if let Some(deadline) = self.pending_end_conversation_at_ms {
            if now_ms >= deadline {
                self.pending_end_conversation_at_ms = None;
                if !self.world.session_id.is_empty() {
                    self.conv.set_state(FaceConvState::Done);
                    self.end_conversation().await;
                }
            }
        }

        // 2. MCU telemetry snapshots.
        self.drain_mcu_events().await;
        self.snapshot_motion();
        self.snapshot_face().await;

        // 3. Edge detection.
        self.event_bus.ingest(&self.robot, &self.world);
        self.world.event_count = self.event_bus.event_count();

        // 4. Mode state machine + personality system events.
        let prev_mode = self.robot.mode;
        self.robot.mode = self
            .mode_sm
            .update(self.robot.motion_connected, self.robot.fault_flags);
        self.forward_pe_system_events(prev_mode).await;

        // 5. Behavior engine.
        let desired = self.behavior.step(&self.robot, &self.world);
        self.robot.twist_cmd = desired;

        // 6. Safety cascade.
        let capped = self.safety.apply(desired, &mut self.robot, &self.world);
        self.robot.twist_capped = capped;

        // 7. MCU outputs.
        self.emit_mcu(capped, now_ms);

        // 8/9. Scheduled actions, policy speech, plan requests.
        self.emit_worker_actions(now_ms).await;

        // 10. Telemetry broadcast.
        self.telem_counter += 1;
        if self.telem_counter >= self.telem_every_n {
            self.telem_counter = 0;
            self.broadcast_telemetry(now_ms);
        }
    }

    // ── Control surface ──────────────────────────────────────────

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                CoreCommand::SetTeleopTwist { v_mm_s, w_mrad_s } => {
                    self.behavior.set_teleop_twist(v_mm_s, w_mrad_s);
                }
                CoreCommand::RequestMode { target, reply } => {
                    let result = self.mode_sm.request_mode(
                        target,
                        self.robot.motion_connected,
                        self.robot.fault_flags,
                    );
                    let _ = reply.send(result);
                }
                CoreCommand::ClearError { reply } => {
                    // Ask the MCU to drop its latched fault bits too.
                    if let Some(motion) = self.motion.as_mut() {
                        if motion.connected() {
                            motion.send_clear_faults(0xFFFF);
                        }
                    }
                    let result = self
                        .mode_sm
                        .clear_error(self.robot.motion_connected, self.robot.fault_flags);
                    let _ = reply.send(result);
                }
                CoreCommand::SetVisionPolicy(policy) => self.safety.configure_vision(policy),
                CoreCommand::Shutdown => self.running = false,
            }
        }
    }

    // ── MCU input ────────────────────────────────────────────────

    async fn drain_mcu_events(&mut self) {
        if let (Some(rx), Some(client)) = (self.motion_events.as_mut(), self.motion.as_mut()) {
            loop {
                match rx.try_recv() {
                    Ok(evt) => client.on_transport_event(&evt),
                    Err(broadcast::error::TryRecvError::Lagged(n)) => {
                        warn!("motion events lagged by {}", n);
                    }
                    Err(_) => break,
                }
            }
        }
        if let (Some(rx), Some(client)) = (self.face_events.as_mut(), self.face.as_mut()) {
            loop {
                match rx.try_recv() {
                    Ok(evt) => client.on_transport_event(&evt),
                    Err(broadcast::error::TryRecvError::Lagged(n)) => {
                        warn!("face events lagged by {}", n);
                    }
                    Err(_) => break,
                }
            }
        }

        // Face inputs (buttons, touch) arrive decoded by the client.
        let inputs: Vec<FaceInput> = match self.face.as_mut() {
            Some(face) => face.take_inputs(),
            None => Vec::new(),
        };
        for input in inputs {
            match input {
                FaceInput::Button(evt) => self.on_face_button(&evt).await,
                FaceInput::Touch(evt) => self.event_bus.on_face_touch(&evt),
            }
        }
    }

    fn snapshot_motion(&mut self) {
        let connected = self.motion.as_ref().is_some_and(MotionClient::connected);
        self.robot.motion_connected = connected;

        if let Some(tel) = self.motion.as_ref().and_then(MotionClient::telemetry) {
            let s = tel.state;
            self.robot.speed_l_mm_s = s.speed_l_mm_s;
            self.robot.speed_r_mm_s = s.speed_r_mm_s;
            self.robot.gyro_z_mrad_s = s.gyro_z_mrad_s;
            self.robot.accel_x_mg = s.accel_x_mg;
            self.robot.accel_y_mg = s.accel_y_mg;
            self.robot.accel_z_mg = s.accel_z_mg;
            self.robot.battery_mv = s.battery_mv;
            self.robot.fault_flags = Fault::from_bits_truncate(s.fault_flags);
            self.robot.range_mm = s.range_mm;
            self.robot.range_status = rover_proto::types::RangeStatus::from_u8(s.range_status)
                .unwrap_or(rover_proto::types::RangeStatus::NotReady);
            self.robot.motion_seq = tel.seq;
            self.robot.motion_rx_mono_ms = tel.rx_mono_ns as f64 / 1e6;
            self.robot.v_meas_mm_s = tel.v_meas_mm_s;
            self.robot.w_meas_mrad_s = tel.w_meas_mrad_s;
            self.robot.tilt_angle_deg =
                f32::from(s.accel_x_mg).atan2(f32::from(s.accel_z_mg)).to_degrees();
            self.robot.accel_magnitude_mg = (f32::from(s.accel_x_mg).powi(2)
                + f32::from(s.accel_y_mg).powi(2)
                + f32::from(s.accel_z_mg).powi(2))
            .sqrt();
        }

        if let Some(clock) = &self.motion_clock {
            self.robot.motion_clock = *clock.lock();
        }
        if let Some(clock) = &self.face_clock {
            self.robot.face_clock = *clock.lock();
        }
    }

    async fn snapshot_face(&mut self) {
        let Some(face) = self.face.as_mut() else {
            self.robot.face_connected = false;
            return;
        };
        self.robot.face_connected = face.connected();

        if face.connected() && !self.face_flags_sent {
            // Default flags once per connection.
            self.face_flags_sent = true;
            face.send_flags(FaceFlags::all());
        } else if !face.connected() {
            self.face_flags_sent = false;
        }

        if let Some(tel) = face.telemetry() {
            self.robot.face_mood = tel.status.mood_id;
            self.robot.face_gesture = tel.status.active_gesture;
            self.robot.face_system_mode = tel.status.system_mode;
            self.robot.face_touch_active = tel.status.touch_active();
            self.robot.face_seq = tel.seq;
            self.robot.face_rx_mono_ms = tel.rx_mono_ns as f64 / 1e6;
        }
    }

    // ── Face button handling ─────────────────────────────────────

    async fn on_face_button(&mut self, evt: &rover_mcu::face::ButtonEvent) {
        self.event_bus.on_face_button(evt);
        self.robot.face_last_button_id = i16::from(evt.button_id);
        self.robot.face_last_button_event = i16::from(evt.event_type);
        self.robot.face_last_button_state = evt.state;

        let button = FaceButtonId::from_u8(evt.button_id);
        let kind = ButtonEventType::from_u8(evt.event_type);

        // Every click nudges the personality engine.
        if kind == Some(ButtonEventType::Click) {
            let mut payload = Map::new();
            payload.insert("button_id".into(), json!(evt.button_id));
            self.workers
                .send_to("personality", msg::PERSONALITY_EVENT_BUTTON_PRESS, Some(payload))
                .await;
        }

        // PTT toggle: conversation start/stop.
        if button == Some(FaceButtonId::Ptt) && kind == Some(ButtonEventType::Toggle) {
            let ptt_on = evt.state != 0;
            self.world.ptt_active = ptt_on;
            if ptt_on {
                self.start_conversation("ptt").await;
                self.conv.ptt_held = true;
                self.conv.set_state(FaceConvState::Attention);
            } else {
                self.conv.ptt_held = false;
                self.end_conversation().await;
            }
        }

        // ACTION click: cancel during a session, greet outside one.
        if button == Some(FaceButtonId::Action) && kind == Some(ButtonEventType::Click) {
            if self.conv.session_active {
                self.conv.set_state(FaceConvState::Done);
                if !self.world.session_id.is_empty() {
                    self.end_conversation().await;
                }
            } else {
                let now_ms = self.robot.tick_mono_ms;
                if now_ms - self.last_greet_ms > GREET_DEBOUNCE_MS {
                    self.last_greet_ms = now_ms;
                    self.trigger_greet();
                }
            }
        }
    }

    fn trigger_greet(&mut self) {
        self.scheduler.active_skill = Skill::GreetOnButton;
        if let Some(face) = self.face.as_mut() {
            if face.connected() {
                face.send_state(FaceMood::Excited as u8, 0.8, 0.0, 0.0, 0.78);
                face.send_gesture(FaceGesture::Nod as u8, 500);
            }
        }
    }

    // ── Conversation events ──────────────────────────────────────

    async fn handle_conversation_event(&mut self, env: &Envelope) {
        match env.msg_type.as_str() {
            msg::AI_CONVERSATION_EMOTION => {
                let emotion = env.str_field("emotion").to_string();
                let intensity = env.f64_field("intensity", 0.7) as f32;
                // Queue during LISTENING/PTT/THINKING; the face must
                // reflect the conversation phase until speech starts.
                if matches!(
                    self.conv.state,
                    FaceConvState::Listening | FaceConvState::Ptt | FaceConvState::Thinking
                ) {
                    self.queued_emotion = emotion.clone();
                    self.queued_intensity = intensity;
                } else {
                    self.conversation_emotion = emotion.clone();
                    self.conversation_intensity = intensity;
                }
                // Relay to the personality engine as an impulse source.
                let mut payload = Map::new();
                payload.insert("emotion".into(), json!(emotion));
                payload.insert("intensity".into(), json!(intensity));
                if let Some(session) = &env.session_id {
                    payload.insert("session_id".into(), json!(session));
                }
                self.workers
                    .send_to("personality", msg::PERSONALITY_EVENT_AI_EMOTION, Some(payload))
                    .await;
            }
            msg::AI_CONVERSATION_GESTURE => {
                self.conversation_gestures = env
                    .field("names")
                    .and_then(Value::as_array)
                    .map(|names| {
                        names
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
            }
            msg::AI_CONVERSATION_DONE => {
                self.conversation_emotion.clear();
                self.conversation_intensity = 0.0;
                self.conversation_gestures.clear();
                self.queued_emotion.clear();
                self.queued_intensity = 0.0;
                self.conv.set_state(FaceConvState::Done);
                if !self.world.session_id.is_empty() {
                    let mut payload = Map::new();
                    payload.insert("session_id".into(), json!(self.world.session_id));
                    self.workers
                        .send_to("personality", msg::PERSONALITY_EVENT_CONV_ENDED, Some(payload))
                        .await;
                }
                if self.world.conversation_trigger == "wake_word"
                    && !self.world.session_id.is_empty()
                {
                    self.finish_session();
                }
            }
            msg::PERSONALITY_EVENT_MEMORY_EXTRACT => {
                // Extracted by the AI worker; the personality engine owns
                // the store.
                self.workers
                    .send_to(
                        "personality",
                        msg::PERSONALITY_EVENT_MEMORY_EXTRACT,
                        Some(env.payload.clone()),
                    )
                    .await;
            }
            msg::PERSONALITY_EVENT_GUARDRAIL_TRIGGERED => {
                let rule = env.str_field("rule");
                if rule == "session_time_limit" && !self.world.session_id.is_empty() {
                    info!("session time limit - ending conversation");
                    self.enqueue_say(
                        "Hey, we've been chatting for a while! \
                         Let's take a break and do something else for a bit.",
                        "guardrail",
                        1,
                    )
                    .await;
                    // Let the wind-down line play before teardown.
                    self.pending_end_conversation_at_ms = Some(self.robot.tick_mono_ms + 4000.0);
                } else if rule == "daily_time_limit" || rule == "daily_limit_blocked" {
                    info!("daily time limit - conversations blocked");
                }
            }
            msg::EAR_EVENT_WAKE_WORD => {
                if self.world.session_id.is_empty() && !self.world.speaking {
                    self.start_conversation("wake_word").await;
                    self.conv.set_state(FaceConvState::Attention);
                }
            }
            msg::EAR_EVENT_END_OF_UTTERANCE => {
                if !self.world.session_id.is_empty()
                    && self.world.conversation_trigger == "wake_word"
                {
                    self.conv.set_state(FaceConvState::Thinking);
                    let session = self.world.session_id.clone();
                    self.workers
                        .send_to_session("ai", msg::AI_CMD_END_UTTERANCE, None, &session)
                        .await;
                    self.workers.send_to("ear", msg::EAR_CMD_STOP_LISTENING, None).await;
                    self.robot.face_listening = false;
                }
            }
            msg::TTS_EVENT_STARTED => {
                self.workers.send_to("ear", msg::EAR_CMD_PAUSE_VAD, None).await;
                let mut payload = Map::new();
                payload.insert("speaking".into(), json!(true));
                self.workers
                    .send_to("personality", msg::PERSONALITY_EVENT_SPEECH_ACTIVITY, Some(payload))
                    .await;
                if self.conv.session_active {
                    self.conv.set_state(FaceConvState::Speaking);
                    if !self.queued_emotion.is_empty() {
                        self.conversation_emotion = std::mem::take(&mut self.queued_emotion);
                        self.conversation_intensity = self.queued_intensity;
                        self.queued_intensity = 0.0;
                    }
                }
            }
            msg::TTS_EVENT_FINISHED | msg::TTS_EVENT_CANCELLED => {
                self.workers.send_to("ear", msg::EAR_CMD_RESUME_VAD, None).await;
                if env.msg_type == msg::TTS_EVENT_FINISHED {
                    // CANCELLED means the user interrupted; stop at once.
                    self.talking_grace_ticks = POST_TALKING_GRACE_TICKS;
                }
                if self.conv.session_active {
                    if !self.world.session_id.is_empty() {
                        self.conv.set_state(FaceConvState::Listening);
                    } else {
                        self.conv.set_state(FaceConvState::Done);
                    }
                }
            }
            _ => {}
        }
    }

    // ── Conversation control ─────────────────────────────────────

    async fn start_conversation(&mut self, trigger: &str) {
        if !self.world.both_audio_links_up() {
            warn!("cannot start conversation: audio links not up");
            return;
        }
        if !self.world.session_id.is_empty() {
            return;
        }
        if self.world.personality_daily_limit_reached {
            info!("conversation blocked: daily time limit reached");
            return;
        }

        self.world.session_id = new_session_id();
        self.world.turn_id = 1;
        self.world.conversation_trigger = trigger.to_string();

        let session = self.world.session_id.clone();
        let mut payload = Map::new();
        payload.insert("session_id".into(), json!(session));
        payload.insert("turn_id".into(), json!(self.world.turn_id));
        self.workers
            .send_to("ai", msg::AI_CMD_START_CONVERSATION, Some(payload))
            .await;

        self.workers.send_to("ear", msg::EAR_CMD_START_LISTENING, None).await;

        let mut payload = Map::new();
        payload.insert("session_id".into(), json!(session));
        payload.insert("trigger".into(), json!(trigger));
        self.workers
            .send_to("personality", msg::PERSONALITY_EVENT_CONV_STARTED, Some(payload))
            .await;

        if trigger == "wake_word" {
            let mut payload = Map::new();
            payload.insert("chime".into(), json!("listening"));
            self.workers.send_to("tts", msg::TTS_CMD_PLAY_CHIME, Some(payload)).await;
        }

        self.robot.face_listening = true;
    }

    async fn end_conversation(&mut self) {
        // Tell the personality engine first so affect recovery starts
        // even when the AI worker's done-event never arrives.
        if !self.world.session_id.is_empty() {
            let mut payload = Map::new();
            payload.insert("session_id".into(), json!(self.world.session_id));
            self.workers
                .send_to("personality", msg::PERSONALITY_EVENT_CONV_ENDED, Some(payload))
                .await;
        }
        self.workers.send_to("ear", msg::EAR_CMD_STOP_LISTENING, None).await;
        let session = self.world.session_id.clone();
        self.workers
            .send_to_session("ai", msg::AI_CMD_END_CONVERSATION, None, &session)
            .await;
        self.robot.face_listening = false;
        self.finish_session();
    }

    fn finish_session(&mut self) {
        self.world.session_id.clear();
        self.world.turn_id = 0;
        self.world.conversation_trigger.clear();
    }

    // ── Personality system events ────────────────────────────────

    async fn forward_pe_system_events(&mut self, prev_mode: Mode) {
        // Boot complete, once.
        if !self.pe_boot_sent && prev_mode == Mode::Boot && self.robot.mode == Mode::Idle {
            self.pe_boot_sent = true;
            let mut payload = Map::new();
            payload.insert("event".into(), json!("boot"));
            self.workers
                .send_to("personality", msg::PERSONALITY_EVENT_SYSTEM_STATE, Some(payload))
                .await;
        }

        // Low-battery edge, re-armed when the level recovers.
        if self.robot.battery_mv > 0 {
            let is_low = self.robot.battery_mv < self.low_battery_mv;
            if is_low && !self.pe_low_battery_sent {
                self.pe_low_battery_sent = true;
                let mut payload = Map::new();
                payload.insert("event".into(), json!("low_battery"));
                payload.insert("battery_mv".into(), json!(self.robot.battery_mv));
                self.workers
                    .send_to("personality", msg::PERSONALITY_EVENT_SYSTEM_STATE, Some(payload))
                    .await;
            } else if !is_low && self.pe_low_battery_sent {
                self.pe_low_battery_sent = false;
            }
        }

        // Fault deltas.
        if self.robot.fault_flags != self.pe_prev_faults {
            let raised = self.robot.fault_flags.difference(self.pe_prev_faults);
            let cleared = self.pe_prev_faults.difference(self.robot.fault_flags);
            self.pe_prev_faults = self.robot.fault_flags;

            if !raised.is_empty() {
                let mut payload = Map::new();
                payload.insert("event".into(), json!("fault_raised"));
                payload.insert("flags".into(), json!(raised.bits()));
                self.workers
                    .send_to("personality", msg::PERSONALITY_EVENT_SYSTEM_STATE, Some(payload))
                    .await;
            }
            if !cleared.is_empty() {
                let mut payload = Map::new();
                payload.insert("event".into(), json!("fault_cleared"));
                payload.insert("flags".into(), json!(cleared.bits()));
                self.workers
                    .send_to("personality", msg::PERSONALITY_EVENT_SYSTEM_STATE, Some(payload))
                    .await;
            }
        }
    }

    // ── MCU output ───────────────────────────────────────────────

    fn emit_mcu(&mut self, capped: Twist, now_ms: f64) {
        // Twist every tick, zero included: refreshes the MCU watchdog.
        if let Some(motion) = self.motion.as_mut() {
            if motion.connected() {
                motion.send_twist(capped.v_mm_s, capped.w_mrad_s);
            }
        }

        if self.face.as_ref().map_or(true, |f| !f.connected()) {
            self.last_face_system = None;
            return;
        }

        self.emit_face_system_overlay();
        self.emit_face_talking();
        if self.robot.face_manual_lock {
            // Dashboard owns the face; skip auto-emotion entirely.
            self.conversation_gestures.clear();
            return;
        }
        self.emit_face_composition(now_ms);
    }

    /// SET_SYSTEM only on change of `(overlay, param)`.
    fn emit_face_system_overlay(&mut self) {
        if self.robot.face_manual_lock {
            return;
        }
        let mut param = 0u8;
        let overlay = if self.robot.mode == Mode::Boot {
            FaceSystemMode::Booting
        } else if self.robot.mode == Mode::Error {
            FaceSystemMode::ErrorDisplay
        } else if self.robot.battery_mv > 0 && self.robot.battery_mv < self.low_battery_mv {
            let fill = (f64::from(self.robot.battery_mv) - BATTERY_EMPTY_MV)
                / (BATTERY_FULL_MV - BATTERY_EMPTY_MV);
            param = (fill * 255.0).clamp(0.0, 255.0) as u8;
            FaceSystemMode::LowBattery
        } else {
            FaceSystemMode::None
        };

        let desired = (overlay as u8, param);
        if self.last_face_system != Some(desired) {
            if let Some(face) = self.face.as_mut() {
                face.send_system_mode(desired.0, desired.1);
            }
            self.last_face_system = Some(desired);
        }
    }

    /// SET_TALKING while speaking or during the post-finish grace.
    fn emit_face_talking(&mut self) {
        let Some(face) = self.face.as_mut() else { return };
        if self.world.speaking {
            face.send_talking(true, self.world.current_energy);
            self.robot.face_talking = true;
            self.robot.face_talking_energy = self.world.current_energy;
            self.talking_grace_ticks = 0;
        } else if self.talking_grace_ticks > 0 {
            self.talking_grace_ticks -= 1;
            face.send_talking(true, 0);
            self.robot.face_talking = true;
            self.robot.face_talking_energy = 0;
        } else if self.robot.face_talking {
            face.send_talking(false, 0);
            self.robot.face_talking = false;
            self.robot.face_talking_energy = 0;
        }
    }

    /// The per-tick mood/gaze/gesture composition.
    fn emit_face_composition(&mut self, now_ms: f64) {
        let conv_changed = self.conv.consume_changed();

        // Flag override + border phase on transitions.
        if conv_changed {
            if let Some(flags) = self.conv.flags() {
                if let Some(face) = self.face.as_mut() {
                    face.send_flags(flags);
                }
            }
            if let Some(face) = self.face.as_mut() {
                face.send_conv_state(self.conv.state as u8);
            }
            self.choreo.on_transition(self.conv.prev_state, self.conv.state);
        }

        // Advance the choreographer; dispatch its actions.
        let mut choreo_mood_nudge: Option<(FaceMood, f32)> = None;
        for action in self.choreo.update(self.robot.tick_dt_ms) {
            match action {
                TransitionAction::Gesture { gesture, duration_ms } => {
                    if let Some(face) = self.face.as_mut() {
                        face.send_gesture(gesture as u8, duration_ms);
                    }
                }
                TransitionAction::MoodNudge { mood, intensity } => {
                    choreo_mood_nudge = Some((mood, intensity));
                }
            }
        }

        // Gaze: choreographer ramp > conversation override > center.
        let gaze = match self.choreo.gaze_override() {
            Some((x, y)) => Some((x * GAZE_SEND_SCALE, y * GAZE_SEND_SCALE)),
            None => self.conv.gaze_for_send(),
        };

        // Backchannel nod while LISTENING, unless a script is running.
        if self.conv.consume_nod() && !self.choreo.active() {
            if let Some(face) = self.face.as_mut() {
                face.send_gesture(FaceGesture::Nod as u8, 350);
            }
        }

        // Mood pipeline: determine target → guardrail → sequencer.
        let dt_s = self.robot.tick_dt_ms / 1000.0;
        if !self.choreo.suppress_mood_pipeline() {
            let (target_mood, target_intensity) = self.determine_target_mood(now_ms);
            self.mood_seq.request_mood(target_mood as u8, target_intensity);
        } else if let Some((mood, intensity)) = choreo_mood_nudge {
            self.mood_seq.request_mood(mood as u8, intensity);
        }

        self.mood_seq.update(dt_s);

        // Sequencer blink, unless the choreographer already blinked.
        if self.mood_seq.consume_blink() && !self.choreo.has_blink() {
            if let Some(face) = self.face.as_mut() {
                face.send_gesture(FaceGesture::Blink as u8, 180);
            }
        }

        self.robot.face_seq_phase = self.mood_seq.phase as u8;
        self.robot.face_seq_mood_id = self.mood_seq.mood_id;
        self.robot.face_seq_intensity = self.mood_seq.intensity;
        self.robot.face_choreo_active = self.choreo.active();

        // SET_STATE when the mood is moving or a gaze override is live.
        let mood_active = self.mood_seq.transitioning() || self.mood_seq.consume_changed();
        if mood_active || gaze.is_some() {
            let (gx, gy) = gaze.unwrap_or((0.0, 0.0));
            if let Some(face) = self.face.as_mut() {
                face.send_state(self.mood_seq.mood_id, self.mood_seq.intensity, gx, gy, 0.78);
            }
        }

        // Buffered AI-provided gestures.
        let gestures = std::mem::take(&mut self.conversation_gestures);
        for name in gestures {
            if let Some(gesture) = gesture_to_id(&name) {
                if let Some(face) = self.face.as_mut() {
                    face.send_gesture(gesture as u8, 500);
                }
            }
        }
    }

    /// Precedence: conversation clamp > fresh personality snapshot >
    /// AI-provided emotion fallback (with tick-loop guardrails).
    fn determine_target_mood(&mut self, now_ms: f64) -> (FaceMood, f32) {
        if let Some((mood, intensity)) = self.conv.mood_hint() {
            return (mood, intensity);
        }

        let pe_age = now_ms - self.world.personality_snapshot_ts_ms;
        let pe_fresh = self.world.personality_snapshot_ts_ms > 0.0 && pe_age < PE_STALE_MS;
        if pe_fresh {
            // The personality worker already enforced its guardrails.
            let mood = emotion_to_mood(&self.world.personality_mood).unwrap_or(FaceMood::Neutral);
            return (mood, self.world.personality_intensity);
        }

        let mut target = (FaceMood::Neutral, 1.0f32);
        if !self.conversation_emotion.is_empty() {
            if let Some(mood) = emotion_to_mood(&self.conversation_emotion) {
                target = (mood, self.conversation_intensity);
            }
        }
        self.guardrails
            .check(target.0, target.1, self.conv.session_active, now_ms / 1000.0)
    }

    // ── Worker actions ───────────────────────────────────────────

    async fn emit_worker_actions(&mut self, now_ms: f64) {
        let face_locked = self.robot.face_talking
            || self.robot.face_listening
            || self.robot.face_manual_lock;
        let due = self.scheduler.pop_due_actions(now_ms, face_locked);
        self.world.active_skill = self.scheduler.active_skill;

        for action in due {
            match action {
                Action::Say { text } => self.enqueue_say(&text, "planner", 2).await,
                Action::Emote { name, intensity } => {
                    // Route through the personality engine as an impulse;
                    // the face reads moods from its snapshot.
                    let mut payload = Map::new();
                    payload.insert("emotion".into(), json!(name));
                    payload.insert("intensity".into(), json!(intensity));
                    self.workers
                        .send_to("personality", msg::PERSONALITY_EVENT_AI_EMOTION, Some(payload))
                        .await;
                }
                Action::Gesture { name } => {
                    if let Some(gesture) = gesture_to_id(&name) {
                        if let Some(face) = self.face.as_mut() {
                            if face.connected() {
                                face.send_gesture(gesture as u8, 500);
                            }
                        }
                    }
                }
                Action::Skill { .. } => {} // applied at enqueue time
            }
        }

        // Deterministic idle-priority speech.
        let recent = self.event_bus.latest(10);
        let (intents, drops) = self.speech_policy.generate(&self.robot, &recent, now_ms);
        for reason in drops {
            self.world.count_say_drop(reason);
        }
        for intent in intents {
            self.enqueue_say(&intent.text, "speech_policy", 3).await;
        }

        // Periodic world snapshot to the planner.
        if self.world.planner_enabled
            && self.world.planner_connected
            && now_ms - self.last_plan_request_ms > PLAN_PERIOD_MS
        {
            self.last_plan_request_ms = now_ms;
            self.request_plan().await;
        }
    }

    /// Speech arbitration: lower priority number wins; an equal-or-lower
    /// priority arrival is dropped while something is speaking, a
    /// strictly higher one cancels the in-flight utterance.
    async fn enqueue_say(&mut self, text: &str, source: &str, priority: u8) {
        self.world.say_requested += 1;

        if self.world.speaking && priority >= self.world.speech_priority {
            let reason = format!("preempted_by_p{}", self.world.speech_priority);
            self.world.count_say_drop(reason);
            return;
        }
        if self.world.speaking && priority < self.world.speech_priority {
            self.workers.send_to("tts", msg::TTS_CMD_CANCEL, None).await;
        }

        let mut payload = Map::new();
        payload.insert("text".into(), json!(text));
        payload.insert("emotion".into(), json!(self.world.personality_mood));
        payload.insert("source".into(), json!(source));
        payload.insert("priority".into(), json!(priority));
        let sent = self.workers.send_to("tts", msg::TTS_CMD_SPEAK, Some(payload)).await;
        if sent {
            self.world.say_enqueued += 1;
            self.world.speech_source = source.to_string();
            self.world.speech_priority = priority;
        }
    }

    async fn request_plan(&mut self) {
        let recent: Vec<String> = self
            .event_bus
            .latest(5)
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        let world_state = json!({
            "robot_id": self.robot_id,
            "mode": self.robot.mode.as_str(),
            "battery_mv": self.robot.battery_mv,
            "range_mm": self.robot.range_mm,
            "faults": self.robot.fault_flags.names(),
            "ball_detected": self.world.ball_confidence > 0.3,
            "ball_confidence": self.world.ball_confidence,
            "ball_bearing_deg": self.world.ball_bearing_deg,
            "vision_age_ms": self.world.vision_age_ms(self.robot.tick_mono_ms),
            "speed_l_mm_s": self.robot.speed_l_mm_s,
            "speed_r_mm_s": self.robot.speed_r_mm_s,
            "trigger": "periodic",
            "recent_events": recent,
            "planner_active_skill": self.world.active_skill.as_str(),
            "face_talking": self.robot.face_talking,
            "face_listening": self.robot.face_listening,
        });
        let mut payload = Map::new();
        payload.insert("world_state".into(), world_state);
        self.workers.send_to("ai", msg::AI_CMD_REQUEST_PLAN, Some(payload)).await;
    }

    // ── Telemetry ────────────────────────────────────────────────

    fn broadcast_telemetry(&self, now_ms: f64) {
        let Some(cb) = &self.on_telemetry else { return };
        let mut combined = self.robot.to_json();
        combined.extend(self.world.to_json(now_ms));
        let workers: Vec<Value> = self
            .workers
            .snapshot()
            .into_iter()
            .map(|w| {
                json!({
                    "name": w.name,
                    "alive": w.alive,
                    "restart_count": w.restart_count,
                    "pid": w.pid,
                    "health": w.health,
                })
            })
            .collect();
        combined.insert("worker_health".into(), Value::Array(workers));
        cb(Value::Object(combined));
    }
}

fn new_session_id() -> String {
    // 12 hex chars of entropy, matching the session id wire format.
    use rand::RngCore;
    let mut bytes = [0u8; 6];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("sess-{hex}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rover_common::config::WorkersConfig;

    fn test_loop() -> (TickLoop, mpsc::UnboundedSender<WorkerEvent>) {
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let workers = Arc::new(WorkerSupervisor::new(WorkersConfig::default(), event_tx));
        let config = SupervisorConfig::default();
        let tick = TickLoop::new(
            &config, None, None, None, None, None, None, workers, worker_rx,
        );
        (tick, worker_tx)
    }

    fn envelope(msg_type: &str, payload: Value) -> Envelope {
        let mut env = Envelope::new(msg_type, "test", 0, 0);
        if let Value::Object(map) = payload {
            env.payload = map;
        }
        env
    }

    #[tokio::test]
    async fn boot_without_mcu_stays_boot() {
        let (mut tick, _tx) = test_loop();
        tick.tick_at(20.0, 20.0).await;
        assert_eq!(tick.robot.mode, Mode::Boot);
        assert_eq!(tick.robot.twist_capped, Twist::ZERO);
        assert_eq!(tick.robot.speed_caps[0].reason, "mode=BOOT");
    }

    #[tokio::test]
    async fn worker_envelopes_update_world() {
        let (mut tick, tx) = test_loop();
        tx.send((
            "vision".into(),
            envelope(
                msg::VISION_DETECTION_SNAPSHOT,
                json!({"clear_confidence": 0.9, "ball_confidence": 0.4, "fps": 15.0}),
            ),
        ))
        .unwrap();
        tick.tick_at(20.0, 20.0).await;
        assert_eq!(tick.world.clear_confidence, 0.9);
        assert_eq!(tick.world.vision_rx_mono_ms, 20.0);
    }

    #[tokio::test]
    async fn plan_flow_sets_active_skill() {
        let (mut tick, tx) = test_loop();
        tx.send((
            "ai".into(),
            envelope(
                msg::AI_PLAN_RECEIVED,
                json!({
                    "plan_id": "p1", "plan_seq": 1, "ttl_ms": 2000,
                    "actions": [{"action": "skill", "name": "scan_for_target"}],
                }),
            ),
        ))
        .unwrap();
        tick.tick_at(20.0, 20.0).await;
        assert_eq!(tick.world.active_skill, Skill::ScanForTarget);
        assert_eq!(tick.world.plan_seq_last_accepted, 1);
    }

    #[tokio::test]
    async fn duplicate_plan_counted() {
        let (mut tick, tx) = test_loop();
        for seq in [1, 2] {
            tx.send((
                "ai".into(),
                envelope(
                    msg::AI_PLAN_RECEIVED,
                    json!({
                        "plan_id": "X", "plan_seq": seq, "ttl_ms": 2000,
                        "actions": [{"action": "say", "text": "hi"}],
                    }),
                ),
            ))
            .unwrap();
        }
        tick.tick_at(20.0, 20.0).await;
        assert_eq!(tick.world.plan_dropped_duplicate, 1);
        assert_eq!(tick.world.plan_seq_last_accepted, 1);
    }

    #[tokio::test]
    async fn tts_events_drive_conversation_and_grace() {
        let (mut tick, tx) = test_loop();
        // Fake an active session so TTS transitions apply.
        tick.conv.set_state(FaceConvState::Attention);
        tick.world.session_id = "sess-x".into();

        tx.send(("tts".into(), envelope(msg::TTS_EVENT_STARTED, json!({})))).unwrap();
        tick.tick_at(20.0, 20.0).await;
        assert!(tick.world.speaking);
        assert_eq!(tick.conv.state, FaceConvState::Speaking);

        tx.send(("tts".into(), envelope(msg::TTS_EVENT_FINISHED, json!({})))).unwrap();
        tick.tick_at(40.0, 20.0).await;
        assert!(!tick.world.speaking);
        assert_eq!(tick.conv.state, FaceConvState::Listening);
        assert_eq!(tick.talking_grace_ticks, POST_TALKING_GRACE_TICKS);
    }

    #[tokio::test]
    async fn speech_arbitration_priorities() {
        let (mut tick, _tx) = test_loop();
        tick.world.speaking = true;
        tick.world.speech_priority = 2;

        // Equal priority while speaking: dropped with a reason counter.
        tick.enqueue_say("hello", "planner", 2).await;
        assert_eq!(tick.world.say_requested, 1);
        assert_eq!(tick.world.say_dropped_reason.get("preempted_by_p2"), Some(&1));

        // Lower priority number preempts: cancel is sent (send_to fails
        // with no worker, so enqueued stays 0, but no drop is counted).
        tick.enqueue_say("urgent", "guardrail", 1).await;
        assert_eq!(tick.world.say_dropped_reason.len(), 1);
    }

    #[tokio::test]
    async fn wake_word_needs_audio_links() {
        let (mut tick, tx) = test_loop();
        tx.send(("ear".into(), envelope(msg::EAR_EVENT_WAKE_WORD, json!({})))).unwrap();
        tick.tick_at(20.0, 20.0).await;
        assert!(tick.world.session_id.is_empty());

        // With both links up the session starts.
        tick.world.mic_link_up = true;
        tick.world.spk_link_up = true;
        tx.send(("ear".into(), envelope(msg::EAR_EVENT_WAKE_WORD, json!({})))).unwrap();
        tick.tick_at(40.0, 20.0).await;
        assert!(tick.world.session_id.starts_with("sess-"));
        assert_eq!(tick.world.conversation_trigger, "wake_word");
        assert_eq!(tick.conv.state, FaceConvState::Attention);
    }

    #[tokio::test]
    async fn daily_limit_blocks_conversation() {
        let (mut tick, tx) = test_loop();
        tick.world.mic_link_up = true;
        tick.world.spk_link_up = true;
        tick.world.personality_daily_limit_reached = true;
        tx.send(("ear".into(), envelope(msg::EAR_EVENT_WAKE_WORD, json!({})))).unwrap();
        tick.tick_at(20.0, 20.0).await;
        assert!(tick.world.session_id.is_empty());
    }

    #[tokio::test]
    async fn conversation_done_tears_down_wake_word_session() {
        let (mut tick, tx) = test_loop();
        tick.world.mic_link_up = true;
        tick.world.spk_link_up = true;
        tx.send(("ear".into(), envelope(msg::EAR_EVENT_WAKE_WORD, json!({})))).unwrap();
        tick.tick_at(20.0, 20.0).await;
        assert!(!tick.world.session_id.is_empty());

        tx.send(("ai".into(), envelope(msg::AI_CONVERSATION_DONE, json!({})))).unwrap();
        tick.tick_at(40.0, 20.0).await;
        assert!(tick.world.session_id.is_empty());
        assert_eq!(tick.conv.state, FaceConvState::Done);
    }

    #[tokio::test]
    async fn guardrail_session_limit_schedules_teardown() {
        let (mut tick, tx) = test_loop();
        tick.world.session_id = "sess-y".into();
        tx.send((
            "personality".into(),
            envelope(msg::PERSONALITY_EVENT_GUARDRAIL_TRIGGERED, json!({"rule": "session_time_limit"})),
        ))
        .unwrap();
        tick.tick_at(1000.0, 20.0).await;
        assert!(tick.pending_end_conversation_at_ms.is_some());

        // Before the deadline the session persists.
        tick.tick_at(3000.0, 20.0).await;
        assert!(!tick.world.session_id.is_empty());

        // After the 4 s wind-down the session is torn down.
        tick.tick_at(5200.0, 20.0).await;
        assert!(tick.world.session_id.is_empty());
    }

    #[tokio::test]
    async fn mode_request_via_handle() {
        let (mut tick, _tx) = test_loop();
        let handle = tick.handle();

        // Not connected: request must fail after a tick processes it.
        let pending = tokio::spawn(async move { handle.request_mode(Mode::Wander).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tick.tick_at(20.0, 20.0).await;
        let result = pending.await.unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn telemetry_fanout_fires_at_divided_rate() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let (mut tick, _tx) = test_loop();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        tick.on_telemetry(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        // 50 Hz tick, 20 Hz telemetry → every ~2-3 ticks.
        for i in 0..10 {
            tick.tick_at(20.0 * f64::from(i + 1), 20.0).await;
        }
        let n = count.load(Ordering::SeqCst);
        assert!(n >= 3 && n <= 5, "telemetry fired {n} times");
    }

    #[tokio::test]
    async fn personality_snapshot_freshness_controls_mood_source() {
        let (mut tick, _tx) = test_loop();
        tick.world.personality_mood = "happy".into();
        tick.world.personality_intensity = 0.6;
        tick.world.personality_snapshot_ts_ms = 1000.0;

        // Fresh snapshot wins.
        let (mood, intensity) = tick.determine_target_mood(2000.0);
        assert_eq!(mood, FaceMood::Happy);
        assert_eq!(intensity, 0.6);

        // Stale snapshot falls back to the AI emotion + guardrails.
        tick.conversation_emotion = "angry".into();
        tick.conversation_intensity = 1.0;
        let (mood, intensity) = tick.determine_target_mood(10_000.0);
        // No conversation active → context gate forces neutral.
        assert_eq!(mood, FaceMood::Neutral);
        assert_eq!(intensity, 0.0);

        tick.conv.session_active = true;
        let (mood, intensity) = tick.determine_target_mood(10_000.0);
        assert_eq!(mood, FaceMood::Angry);
        assert_eq!(intensity, 0.5); // intensity cap
    }

    #[tokio::test]
    async fn conversation_clamp_overrides_snapshot() {
        let (mut tick, _tx) = test_loop();
        tick.world.personality_mood = "happy".into();
        tick.world.personality_snapshot_ts_ms = 900.0;
        tick.conv.set_state(FaceConvState::Attention);
        tick.conv.set_state(FaceConvState::Listening);
        let (mood, intensity) = tick.determine_target_mood(1000.0);
        assert_eq!(mood, FaceMood::Neutral);
        assert_eq!(intensity, 0.3);
    }
}
