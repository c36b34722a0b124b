use crate::api::{now_unix_ms, ActionKind, ActionParams, ActionRequest, GameTransport};
use crate::attack::{AttackPhase, AttackSession, AttackWindow, WindowEvent};
use crate::cache::SnapshotStore;
use crate::config::SyncConfig;
use crate::dashboard::DashboardSync;
use crate::dedup::ResultGate;
use crate::model::{Envelope, ResultRecord, Role, Snapshot};
use crate::schedule::ArmKey;
use std::fmt;
use std::sync::Mutex;
use tokio::sync::{mpsc, watch};

type BoxError = Box<dyn std::error::Error>;

/// User-facing notifications. The UI layer renders these as modals/banners;
/// the engine itself never blocks on them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Immediate feedback when a mutating action goes out.
    Processing { action: &'static str },
    /// Terminal modal for a mutating action, server message verbatim.
    ActionOutcome { ok: bool, message: String },
    /// A contested-action outcome, delivered exactly once per result id.
    AttackResult { stolen: bool, message: String },
}

/// Why a user action did not reach the server, or failed once it did.
#[derive(Debug)]
pub enum ActionError {
    /// Local capability/affordability gate; no network round trip was made.
    Denied(&'static str),
    /// Another mutating call is still in flight.
    Busy,
    NotLoggedIn,
    /// Server said `success: false`; message carried verbatim.
    Rejected(String),
    Transport(String),
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Denied(msg) => write!(f, "denied: {msg}"),
            Self::Busy => write!(f, "another action is still in flight"),
            Self::NotLoggedIn => write!(f, "not logged in"),
            Self::Rejected(msg) => write!(f, "rejected by server: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

impl std::error::Error for ActionError {}

/// Receiving ends handed to the UI layer at login.
pub struct SessionChannels {
    pub notices: mpsc::UnboundedReceiver<Notice>,
    pub snapshots: watch::Receiver<Option<Snapshot>>,
}

struct EngineState {
    dashboard: DashboardSync,
    attack: AttackSession,
    results: ResultGate,
    foreground: bool,
    action_in_flight: bool,
    active: bool,
}

/// One authenticated client session. Owns every piece of engine state and
/// the lifetime of all polling work: once `logout` runs, every loop entry
/// point becomes a no-op, so nothing timer-driven can outlive the session.
///
/// All state sits behind one mutex and locks are never held across an await
/// point; in-flight network effects are reconciled through the guard
/// counters in `DashboardSync` and the arm key in `AttackSession`.
pub struct Session<T: GameTransport> {
    api: T,
    timing: SyncConfig,
    player_id: String,
    credential: String,
    state: Mutex<EngineState>,
    cache: Mutex<SnapshotStore>,
    clock: Box<dyn Fn() -> i64 + Send + Sync>,
    notices: mpsc::UnboundedSender<Notice>,
    snapshot_tx: watch::Sender<Option<Snapshot>>,
}

impl<T: GameTransport> Session<T> {
    pub fn new(
        api: T,
        timing: SyncConfig,
        cache: SnapshotStore,
        player_id: impl Into<String>,
        credential: impl Into<String>,
    ) -> (Self, SessionChannels) {
        Self::with_clock(api, timing, cache, player_id, credential, Box::new(now_unix_ms))
    }

    /// Same as `new` with an injected clock, so tests can drive the
    /// countdown without waiting on wall time.
    pub fn with_clock(
        api: T,
        timing: SyncConfig,
        cache: SnapshotStore,
        player_id: impl Into<String>,
        credential: impl Into<String>,
        clock: Box<dyn Fn() -> i64 + Send + Sync>,
    ) -> (Self, SessionChannels) {
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        let session = Self {
            api,
            timing,
            player_id: player_id.into(),
            credential: credential.into(),
            state: Mutex::new(EngineState {
                dashboard: DashboardSync::default(),
                attack: AttackSession::default(),
                results: ResultGate::default(),
                foreground: true,
                action_in_flight: false,
                active: true,
            }),
            cache: Mutex::new(cache),
            clock,
            notices: notice_tx,
            snapshot_tx,
        };
        (
            session,
            SessionChannels {
                notices: notice_rx,
                snapshots: snapshot_rx,
            },
        )
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    fn notify(&self, notice: Notice) {
        let _ = self.notices.send(notice);
    }

    fn publish_snapshot(&self, snapshot: Option<Snapshot>) {
        let _ = self.snapshot_tx.send_replace(snapshot);
    }

    fn persist_snapshot(&self, snapshot: &Snapshot) {
        let mut cache = self.cache.lock().unwrap();
        if let Err(err) = cache.store_snapshot(&self.player_id, snapshot.clone(), self.now()) {
            tracing::warn!(error = %err, "snapshot cache write failed");
        }
    }

    /// Login bootstrap: hydrate instantly from the cached snapshot if one
    /// exists (stale is fine), then do the real fetch. A transport failure
    /// with a cached view keeps the session usable; an explicit server
    /// rejection always fails the login.
    pub async fn bootstrap(&self) -> Result<(), BoxError> {
        let cached = {
            let cache = self.cache.lock().unwrap();
            cache
                .snapshot_for(&self.player_id)
                .map(|c| c.snapshot.clone())
        };
        if let Some(snapshot) = cached {
            let mut st = self.state.lock().unwrap();
            st.dashboard.hydrate(snapshot.clone());
            drop(st);
            self.publish_snapshot(Some(snapshot));
        }

        match self.api.fetch_dashboard(&self.player_id, &self.credential).await {
            Ok(env) if env.success => {
                let snapshot = Snapshot::from_envelope(&env)
                    .ok_or("login response carried no snapshot")?;
                {
                    let mut st = self.state.lock().unwrap();
                    st.dashboard.apply_authoritative(snapshot.clone());
                }
                self.persist_snapshot(&snapshot);
                self.publish_snapshot(Some(snapshot));
                {
                    let mut cache = self.cache.lock().unwrap();
                    if let Err(err) = cache.set_saved_player_id(&self.player_id) {
                        tracing::warn!(error = %err, "saved player id write failed");
                    }
                }
                Ok(())
            }
            Ok(env) => {
                // bad id / bad credential: the saved id is no longer valid
                let mut cache = self.cache.lock().unwrap();
                if let Err(err) = cache.clear_saved_player_id() {
                    tracing::warn!(error = %err, "saved player id clear failed");
                }
                Err(env
                    .message
                    .unwrap_or_else(|| "login rejected".to_string())
                    .into())
            }
            Err(err) => {
                let has_cache = self.state.lock().unwrap().dashboard.has_snapshot();
                if has_cache {
                    tracing::warn!(error = %err, "login fetch failed, continuing on cached snapshot");
                    Ok(())
                } else {
                    Err(Box::new(err))
                }
            }
        }
    }

    /// Tab visibility gate for the dashboard refresh loop.
    pub fn set_foreground(&self, foreground: bool) {
        self.state.lock().unwrap().foreground = foreground;
    }

    pub fn register_click(&self) -> bool {
        self.state.lock().unwrap().attack.register_click()
    }

    pub fn attack_phase(&self) -> AttackPhase {
        self.state.lock().unwrap().attack.phase()
    }

    /// One pass of the dashboard refresh loop. Returns true when a fresh
    /// snapshot was applied. Suppressed while backgrounded or while an
    /// identical fetch is still in flight; `force` bypasses both (the
    /// superseded read's response is dropped when it lands).
    pub async fn refresh_dashboard_once(&self, force: bool) -> bool {
        let gen = {
            let mut st = self.state.lock().unwrap();
            if !st.active || (!force && !st.foreground) {
                return false;
            }
            match st.dashboard.begin_fetch(force) {
                Some(gen) => gen,
                None => {
                    tracing::debug!("dashboard refresh suppressed: fetch already in flight");
                    return false;
                }
            }
        };

        let result = self.api.fetch_dashboard(&self.player_id, &self.credential).await;
        let applied = {
            let mut st = self.state.lock().unwrap();
            match &result {
                Ok(env) if env.success => {
                    st.dashboard.complete_fetch(gen, Snapshot::from_envelope(env))
                }
                Ok(_) => {
                    st.dashboard.complete_fetch(gen, None);
                    false
                }
                Err(_) => {
                    st.dashboard.complete_fetch(gen, None);
                    false
                }
            }
        };

        match result {
            Ok(env) => {
                if applied {
                    if let Some(snapshot) = Snapshot::from_envelope(&env) {
                        self.persist_snapshot(&snapshot);
                        self.publish_snapshot(Some(snapshot));
                    }
                } else if !env.success {
                    tracing::debug!(message = ?env.message, "dashboard refresh rejected");
                }
            }
            // background failures stay silent; the next poll retries
            Err(err) => tracing::warn!(error = %err, "dashboard refresh failed"),
        }
        applied
    }

    /// One pass of the attack status poll, independent of the dashboard
    /// cadence. Feeds the state machine, routes any attached result through
    /// the dedup gate, and runs the final best-effort flush when a window is
    /// observed closed or replaced.
    pub async fn poll_status_once(&self) {
        let (team_id, role) = {
            let st = self.state.lock().unwrap();
            if !st.active {
                return;
            }
            match team_and_role(&st) {
                Some(pair) => pair,
                None => return,
            }
        };

        let request = ActionRequest {
            kind: ActionKind::AttackStatus,
            student_id: self.player_id.clone(),
            credential: self.credential.clone(),
            params: ActionParams {
                attacker_team_id: Some(team_id.clone()),
                ..Default::default()
            },
        };
        let env = match self.api.submit(&request).await {
            Ok(env) => env,
            Err(err) => {
                tracing::warn!(error = %err, "attack status poll failed");
                return;
            }
        };

        self.absorb_status(&env, role, team_id).await;
    }

    async fn absorb_status(&self, env: &Envelope, role: Role, team_id: String) {
        let now = self.now();
        let reported = match (env.current_target_id.clone(), env.attack_window_end) {
            (Some(target_team_id), Some(ends_at_ms)) => Some(AttackWindow {
                target_team_id,
                ends_at_ms,
            }),
            _ => None,
        };

        let (event, render) = {
            let mut st = self.state.lock().unwrap();
            if !st.active {
                return;
            }
            let render = ResultRecord::from_envelope(env)
                .filter(|rec| st.results.observe(rec));
            (st.attack.observe_status(role, reported, now), render)
        };

        if let Some(rec) = render {
            self.notify(Notice::AttackResult {
                stolen: rec.stolen,
                message: rec.message,
            });
        }

        match event {
            WindowEvent::Opened => {
                tracing::info!(team = %team_id, "attack window open");
            }
            WindowEvent::Replaced { unflushed } | WindowEvent::Closed { unflushed } => {
                if unflushed > 0 {
                    // the old window is gone either way; delivery is
                    // best-effort and a failure is not re-credited
                    if let Err(err) = self.send_clicks(&team_id, unflushed).await {
                        tracing::warn!(error = %err, clicks = unflushed, "teardown click flush failed");
                    }
                }
            }
            WindowEvent::None => {}
        }
    }

    /// One pass of the click flush loop. Drains the pending count into a
    /// single ADD_CLICKS call; nothing pending means no call at all. A
    /// transport failure re-credits the drained amount so no click is lost.
    pub async fn flush_clicks_once(&self) -> u64 {
        // the drained count stays tied to this key; if the window changes
        // while the call is out, the re-credit is dropped instead of
        // leaking into the next window's batch
        let (n, key, team_id) = {
            let mut st = self.state.lock().unwrap();
            if !st.active {
                return 0;
            }
            let team_id = match team_and_role(&st) {
                Some((team_id, _)) => team_id,
                None => return 0,
            };
            let key = match st.attack.window() {
                Some(window) => window.arm_key(),
                None => return 0,
            };
            (st.attack.take_pending_clicks(), key, team_id)
        };
        if n == 0 {
            return 0;
        }

        match self.send_clicks(&team_id, n).await {
            Ok(()) => n,
            Err(err) => {
                let restored = self.state.lock().unwrap().attack.restore_clicks(&key, n);
                if restored {
                    tracing::warn!(error = %err, clicks = n, "click flush failed, re-crediting");
                } else {
                    tracing::warn!(error = %err, clicks = n, "click flush failed, window gone, dropping");
                }
                0
            }
        }
    }

    async fn send_clicks(&self, team_id: &str, clicks: u64) -> Result<(), ActionError> {
        let request = ActionRequest {
            kind: ActionKind::AddClicks,
            student_id: self.player_id.clone(),
            credential: self.credential.clone(),
            params: ActionParams {
                attacker_team_id: Some(team_id.to_string()),
                clicks: Some(clicks),
                ..Default::default()
            },
        };
        match self.api.submit(&request).await {
            Ok(env) if env.success => Ok(()),
            // server-side rejection (window already closed): swallow, the
            // counts have no home to return to
            Ok(env) => {
                tracing::debug!(message = ?env.message, "click flush rejected");
                Ok(())
            }
            Err(err) => Err(ActionError::Transport(err.to_string())),
        }
    }

    /// One pass of the countdown tick loop. Leader side only: when the armed
    /// deadline (plus grace) has passed this runs the full finalize
    /// sequence. Fires at most once per window.
    pub async fn tick_countdown(&self) {
        let fired = {
            let mut st = self.state.lock().unwrap();
            if !st.active {
                return;
            }
            let role = role_of(&st);
            let now = self.now();
            st.attack
                .due_finalize(role, now, self.timing.finalize_grace_ms)
        };
        if let Some(key) = fired {
            self.run_finalize(key).await;
        }
    }

    async fn run_finalize(&self, key: ArmKey) {
        let (remaining, team_id) = {
            let mut st = self.state.lock().unwrap();
            let team_id = match team_and_role(&st) {
                Some((team_id, _)) => team_id,
                None => return,
            };
            match st.attack.begin_finalize(&key) {
                Some(remaining) => (remaining, team_id),
                // window replaced or torn down between fire and here
                None => return,
            }
        };

        if remaining > 0 {
            if let Err(err) = self.send_clicks(&team_id, remaining).await {
                tracing::warn!(error = %err, clicks = remaining, "final click flush failed");
            }
        }

        let request = ActionRequest {
            kind: ActionKind::FinalizeAttack,
            student_id: self.player_id.clone(),
            credential: self.credential.clone(),
            params: ActionParams {
                attacker_team_id: Some(team_id),
                target_team_id: Some(key.target_team_id.clone()),
                ..Default::default()
            },
        };

        match self.api.submit(&request).await {
            Ok(env) => {
                let render = {
                    let mut st = self.state.lock().unwrap();
                    ResultRecord::from_envelope(&env).filter(|rec| st.results.observe(rec))
                };
                if let Some(rec) = render {
                    self.notify(Notice::AttackResult {
                        stolen: rec.stolen,
                        message: rec.message,
                    });
                }
                if !env.success {
                    self.notify(Notice::ActionOutcome {
                        ok: false,
                        message: env
                            .message
                            .clone()
                            .unwrap_or_else(|| "finalize rejected".to_string()),
                    });
                }
                if let Some(snapshot) = Snapshot::from_envelope(&env) {
                    self.state
                        .lock()
                        .unwrap()
                        .dashboard
                        .apply_authoritative(snapshot.clone());
                    self.persist_snapshot(&snapshot);
                    self.publish_snapshot(Some(snapshot));
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "finalize call failed");
                self.notify(Notice::ActionOutcome {
                    ok: false,
                    message: format!("finalize failed: {err}"),
                });
            }
        }

        // success or failure, the window is assumed expired server-side; a
        // stuck local window is worse than a possibly-missed one
        self.state.lock().unwrap().attack.finish_finalize();
        self.refresh_dashboard_once(true).await;
    }

    /// Leader action: open a contested window against `target_team_id`.
    /// Gated locally on role, glove availability and cooldown; the window is
    /// armed only from whatever the server response reports.
    pub async fn start_attack(&self, target_team_id: &str) -> Result<(), ActionError> {
        if target_team_id.trim().is_empty() {
            return Err(ActionError::Denied("no target team selected"));
        }
        self.begin_action(|snapshot| {
            // the glove cooldown is an opaque display string; the server is
            // the one that rejects an attack started inside it
            if snapshot.my_team.gloves == 0 {
                return Err(ActionError::Denied("no glove available"));
            }
            Ok(())
        })?;

        let request = ActionRequest {
            kind: ActionKind::StartAttack,
            student_id: self.player_id.clone(),
            credential: self.credential.clone(),
            params: ActionParams {
                target_team_id: Some(target_team_id.trim().to_string()),
                ..Default::default()
            },
        };
        let env = self.finish_action("start attack", request).await?;

        // the response's window, not the local request, arms the machine
        let (role, team_id) = {
            let st = self.state.lock().unwrap();
            match team_and_role(&st) {
                Some((team_id, role)) => (role, team_id),
                None => return Ok(()),
            }
        };
        self.absorb_status(&env, role, team_id).await;
        Ok(())
    }

    /// Leader action: buy `qty` of a shop item. Affordability is checked
    /// locally against the current snapshot before any network call.
    pub async fn buy(&self, item_id: &str, qty: u32) -> Result<(), ActionError> {
        if qty == 0 {
            return Err(ActionError::Denied("quantity must be at least 1"));
        }
        self.begin_action(|snapshot| {
            let item = snapshot
                .shop_items
                .iter()
                .find(|item| item.item_id == item_id)
                .ok_or(ActionError::Denied("unknown shop item"))?;
            let max_affordable = if item.price > 0 {
                snapshot.my_team.money / item.price
            } else {
                i64::MAX
            };
            if i64::from(qty) > max_affordable {
                return Err(ActionError::Denied("not enough money for that quantity"));
            }
            Ok(())
        })?;

        let request = ActionRequest {
            kind: ActionKind::Buy,
            student_id: self.player_id.clone(),
            credential: self.credential.clone(),
            params: ActionParams {
                item_id: Some(item_id.to_string()),
                qty: Some(qty),
                ..Default::default()
            },
        };
        self.finish_action("buy", request).await.map(|_| ())
    }

    /// Leader action: activate a shield.
    pub async fn use_shield(&self) -> Result<(), ActionError> {
        self.begin_action(|snapshot| {
            if snapshot.my_team.shields == 0 {
                return Err(ActionError::Denied("no shield available"));
            }
            if snapshot.my_team.is_shield_active {
                return Err(ActionError::Denied("a shield is already active"));
            }
            Ok(())
        })?;

        let request = ActionRequest {
            kind: ActionKind::UseShield,
            student_id: self.player_id.clone(),
            credential: self.credential.clone(),
            params: ActionParams::default(),
        };
        self.finish_action("use shield", request).await.map(|_| ())
    }

    /// Shared entry gate for mutating actions: session liveness, one call in
    /// flight at a time, leader role, then the action-specific check. All of
    /// it runs locally; a denial never reaches the network.
    fn begin_action(
        &self,
        check: impl FnOnce(&Snapshot) -> Result<(), ActionError>,
    ) -> Result<(), ActionError> {
        let mut st = self.state.lock().unwrap();
        if !st.active {
            return Err(ActionError::NotLoggedIn);
        }
        if st.action_in_flight {
            return Err(ActionError::Busy);
        }
        let snapshot = st.dashboard.snapshot().ok_or(ActionError::NotLoggedIn)?;
        if !Role::parse(&snapshot.player.role).is_leader() {
            return Err(ActionError::Denied("only the team leader can do this"));
        }
        check(snapshot)?;
        st.action_in_flight = true;
        Ok(())
    }

    async fn finish_action(
        &self,
        label: &'static str,
        request: ActionRequest,
    ) -> Result<Envelope, ActionError> {
        self.notify(Notice::Processing { action: label });

        let result = self.api.submit(&request).await;
        self.state.lock().unwrap().action_in_flight = false;

        let env = match result {
            Ok(env) => env,
            Err(err) => {
                self.notify(Notice::ActionOutcome {
                    ok: false,
                    message: format!("network error: {err}"),
                });
                return Err(ActionError::Transport(err.to_string()));
            }
        };

        if !env.success {
            let message = env
                .message
                .clone()
                .unwrap_or_else(|| "unknown error".to_string());
            self.notify(Notice::ActionOutcome {
                ok: false,
                message: message.clone(),
            });
            return Err(ActionError::Rejected(message));
        }

        if let Some(snapshot) = Snapshot::from_envelope(&env) {
            self.state
                .lock()
                .unwrap()
                .dashboard
                .apply_authoritative(snapshot.clone());
            self.persist_snapshot(&snapshot);
            self.publish_snapshot(Some(snapshot));
        }

        let ok = env.action.as_ref().map(|a| a.ok).unwrap_or(true);
        self.notify(Notice::ActionOutcome {
            ok,
            message: env.message.clone().unwrap_or_else(|| "done".to_string()),
        });
        Ok(env)
    }

    /// Teardown: disarms the finalize schedule, clears attack and dashboard
    /// state, invalidates in-flight reads, and forgets the saved player id.
    /// Every loop entry point is a no-op afterwards.
    pub fn logout(&self) {
        {
            let mut st = self.state.lock().unwrap();
            st.active = false;
            st.attack.reset();
            st.dashboard.clear();
            st.action_in_flight = false;
        }
        {
            let mut cache = self.cache.lock().unwrap();
            if let Err(err) = cache.clear_saved_player_id() {
                tracing::warn!(error = %err, "saved player id clear failed");
            }
        }
        self.publish_snapshot(None);
        tracing::info!("session torn down");
    }
}

fn role_of(st: &EngineState) -> Role {
    st.dashboard
        .snapshot()
        .map(|s| Role::parse(&s.player.role))
        .unwrap_or(Role::Member)
}

fn team_and_role(st: &EngineState) -> Option<(String, Role)> {
    let snapshot = st.dashboard.snapshot()?;
    let team_id = snapshot.my_team.team_id.trim();
    if team_id.is_empty() {
        return None;
    }
    Some((team_id.to_string(), Role::parse(&snapshot.player.role)))
}
