//! Room model: membership, host succession, and the per-round state
//! machine.
//!
//! The room is a pure state machine in the action style: operations
//! validate, mutate, and return an ordered list of [`RoomEvent`]s for the
//! caller to fan out. No I/O happens here, which keeps every rule unit
//! testable. All mutation runs under the server mutex, so `&mut self` is
//! exclusive by construction.
//!
//! Membership is an ordered player list (insertion order drives host
//! succession) plus a monitor list. A user is either a player or a monitor;
//! switching requires leaving and re-joining.

use std::{
    collections::{HashMap, HashSet},
    time::Instant,
};

use cadenza_proto::{Message, RoomId, RoomState};

use crate::{
    l10n::reason,
    replay::{GameEndRecord, PlayRecord},
};

/// Host id used by remote mirrors and rooms that lost every player.
pub const VIRTUAL_HOST: i32 = 0;

/// Per-round phase, the internal superset of the wire [`RoomState`].
#[derive(Debug, Clone)]
pub enum RoomPhase {
    /// Host is choosing a chart.
    SelectChart {
        /// Currently selected chart, if any.
        chart: Option<Chart>,
    },
    /// Waiting for every player to declare ready.
    WaitForReady {
        /// Chart the round will play.
        chart: Chart,
        /// Players that have declared ready (the host counts as ready).
        ready: HashSet<i32>,
        /// When the ready phase began.
        since: Instant,
    },
    /// A round is in progress.
    Playing {
        /// Chart being played.
        chart: Chart,
        /// Outcome per player that reported `Played`.
        finished: HashMap<i32, PlayRecord>,
        /// Players that aborted.
        aborted: HashSet<i32>,
        /// When play began.
        since: Instant,
    },
}

/// Selected chart metadata, resolved through the chart service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chart {
    /// Chart id.
    pub id: i32,
    /// Chart display name.
    pub name: String,
}

/// Ordered side effects produced by room operations.
///
/// The server translates these into wire commands after the operation
/// commits: `Broadcast` and `State` go to every member, `HostChanged`
/// becomes an individual `ChangeHost(true)`, and `Settled` reaches the
/// replay recorder outside the mutex.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    /// Send this message to every member.
    Broadcast(Message),
    /// Announce this state to every member.
    State(RoomState),
    /// This user became host.
    HostChanged(i32),
    /// A round finished with at least one reported play.
    Settled(GameEndRecord),
}

/// A coordinated group of users driven by its host.
#[derive(Debug, Clone)]
pub struct Room {
    id: RoomId,
    host: i32,
    players: Vec<i32>,
    monitors: Vec<i32>,
    phase: RoomPhase,
    locked: bool,
    cycle: bool,
    whitelist: Option<HashSet<i32>>,
    max_users: usize,
    replay: bool,
    remote: bool,
    game_time: f32,
}

impl Room {
    /// Create a room with `host` as its only player.
    pub fn new(id: RoomId, host: i32, max_users: usize, replay: bool) -> Self {
        Self {
            id,
            host,
            players: vec![host],
            monitors: Vec::new(),
            phase: RoomPhase::SelectChart { chart: None },
            locked: false,
            cycle: false,
            whitelist: None,
            max_users,
            replay,
            remote: false,
            game_time: 0.0,
        }
    }

    /// Mirror of a room hosted on a peer server.
    pub fn new_remote(id: RoomId, max_users: usize) -> Self {
        Self {
            id,
            host: VIRTUAL_HOST,
            players: Vec::new(),
            monitors: Vec::new(),
            phase: RoomPhase::SelectChart { chart: None },
            locked: false,
            cycle: false,
            whitelist: None,
            max_users,
            replay: false,
            remote: true,
            game_time: 0.0,
        }
    }

    /// Room id.
    pub fn id(&self) -> &RoomId {
        &self.id
    }

    /// Current host (0 when virtual).
    pub fn host(&self) -> i32 {
        self.host
    }

    /// Players in insertion order.
    pub fn players(&self) -> &[i32] {
        &self.players
    }

    /// Whether this room mirrors a remote one.
    pub fn is_remote(&self) -> bool {
        self.remote
    }

    /// Whether the room is locked against joins.
    pub fn locked(&self) -> bool {
        self.locked
    }

    /// Whether the chart survives a settled round.
    pub fn cycle(&self) -> bool {
        self.cycle
    }

    /// A monitor is watching.
    pub fn live(&self) -> bool {
        !self.monitors.is_empty()
    }

    /// Restrict joins to this whitelist (contest mode); `None` lifts it.
    pub fn set_whitelist(&mut self, whitelist: Option<HashSet<i32>>) {
        self.whitelist = whitelist;
    }

    /// Every member, players first.
    pub fn members(&self) -> impl Iterator<Item = i32> + '_ {
        self.players.iter().chain(self.monitors.iter()).copied()
    }

    /// Whether `user` is a member.
    pub fn contains(&self, user: i32) -> bool {
        self.players.contains(&user) || self.monitors.contains(&user)
    }

    /// Whether `user` plays (rather than monitors).
    pub fn is_player(&self, user: i32) -> bool {
        self.players.contains(&user)
    }

    /// Whether `user` monitors.
    pub fn is_monitor(&self, user: i32) -> bool {
        self.monitors.contains(&user)
    }

    /// Latest timestamp reported in traffic this round.
    pub fn game_time(&self) -> f32 {
        self.game_time
    }

    /// Track the upper bound of reported frame timestamps. Not validated;
    /// informational only.
    pub fn note_game_time(&mut self, t: f32) {
        if t > self.game_time {
            self.game_time = t;
        }
    }

    /// Wire representation of the current phase.
    pub fn wire_state(&self) -> RoomState {
        match &self.phase {
            RoomPhase::SelectChart { chart } => {
                RoomState::SelectChart(chart.as_ref().map(|c| c.id))
            },
            RoomPhase::WaitForReady { .. } => RoomState::WaitingForReady,
            RoomPhase::Playing { .. } => RoomState::Playing,
        }
    }

    /// Whether `user` shows as ready in a snapshot.
    pub fn is_ready(&self, user: i32) -> bool {
        match &self.phase {
            RoomPhase::WaitForReady { ready, .. } => ready.contains(&user) || user == self.host,
            _ => user == self.host,
        }
    }

    /// Validate a join attempt. Rules run in order: contest whitelist,
    /// lock, phase, monitor privilege, capacity.
    pub fn validate_join(
        &self,
        user: i32,
        monitor: bool,
        may_monitor: bool,
    ) -> Result<(), &'static str> {
        if let Some(whitelist) = &self.whitelist {
            if !whitelist.contains(&user) {
                return Err(reason::NOT_WHITELISTED);
            }
        }
        if self.locked {
            return Err(reason::ROOM_LOCKED);
        }
        if !matches!(self.phase, RoomPhase::SelectChart { .. }) {
            return Err(reason::GAME_ONGOING);
        }
        if monitor && !may_monitor {
            return Err(reason::CANT_MONITOR);
        }
        if self.players.len() + self.monitors.len() >= self.max_users {
            return Err(reason::ROOM_FULL);
        }
        Ok(())
    }

    /// Add a validated member.
    pub fn add_member(&mut self, user: i32, monitor: bool) {
        if monitor {
            self.monitors.push(user);
        } else {
            self.players.push(user);
            if self.remote && self.host == VIRTUAL_HOST {
                // First local player anchors a mirrored room.
                self.host = user;
            }
        }
    }

    /// Host-only: toggle the join lock.
    pub fn set_locked(&mut self, user: i32, lock: bool) -> Result<Vec<RoomEvent>, &'static str> {
        if user != self.host {
            return Err(reason::ONLY_HOST);
        }
        self.locked = lock;
        Ok(vec![RoomEvent::Broadcast(Message::LockRoom { lock })])
    }

    /// Host-only: toggle chart cycling.
    pub fn set_cycle(&mut self, user: i32, cycle: bool) -> Result<Vec<RoomEvent>, &'static str> {
        if user != self.host {
            return Err(reason::ONLY_HOST);
        }
        self.cycle = cycle;
        Ok(vec![RoomEvent::Broadcast(Message::CycleRoom { cycle })])
    }

    /// Whether `user` may select a chart right now. Checked before the
    /// chart service call; [`Room::commit_chart`] re-checks after it.
    pub fn can_select_chart(&self, user: i32) -> Result<(), &'static str> {
        if user != self.host {
            return Err(reason::ONLY_HOST);
        }
        if !matches!(self.phase, RoomPhase::SelectChart { .. }) {
            return Err(reason::INVALID_STATE);
        }
        Ok(())
    }

    /// Store a resolved chart and announce it.
    pub fn commit_chart(
        &mut self,
        user: i32,
        chart: Chart,
    ) -> Result<Vec<RoomEvent>, &'static str> {
        self.can_select_chart(user)?;
        let event = RoomEvent::Broadcast(Message::SelectChart {
            user,
            name: chart.name.clone(),
            id: chart.id,
        });
        self.phase = RoomPhase::SelectChart { chart: Some(chart) };
        Ok(vec![event])
    }

    /// Host-only: move to the ready phase. The host counts as ready, so a
    /// single-player room starts playing immediately.
    pub fn request_start(
        &mut self,
        user: i32,
        now: Instant,
    ) -> Result<Vec<RoomEvent>, &'static str> {
        if user != self.host {
            return Err(reason::ONLY_HOST);
        }
        let RoomPhase::SelectChart { chart } = &self.phase else {
            return Err(reason::INVALID_STATE);
        };
        let Some(chart) = chart.clone() else {
            return Err(reason::NO_CHART_SELECTED);
        };
        if self.players.is_empty() {
            return Err(reason::INVALID_STATE);
        }

        self.phase = RoomPhase::WaitForReady {
            chart,
            ready: HashSet::from([self.host]),
            since: now,
        };
        let mut events = vec![
            RoomEvent::Broadcast(Message::GameStart { user }),
            RoomEvent::State(RoomState::WaitingForReady),
        ];
        events.extend(self.maybe_start(now));
        Ok(events)
    }

    /// Declare readiness.
    pub fn ready(&mut self, user: i32, now: Instant) -> Result<Vec<RoomEvent>, &'static str> {
        if self.is_monitor(user) {
            return Err(reason::MONITOR_CANT_PLAY);
        }
        let RoomPhase::WaitForReady { ready, .. } = &mut self.phase else {
            return Err(reason::INVALID_STATE);
        };
        ready.insert(user);
        let mut events = vec![RoomEvent::Broadcast(Message::Ready { user })];
        events.extend(self.maybe_start(now));
        Ok(events)
    }

    /// Withdraw readiness.
    pub fn cancel_ready(&mut self, user: i32) -> Result<Vec<RoomEvent>, &'static str> {
        if self.is_monitor(user) {
            return Err(reason::MONITOR_CANT_PLAY);
        }
        let RoomPhase::WaitForReady { ready, .. } = &mut self.phase else {
            return Err(reason::INVALID_STATE);
        };
        ready.remove(&user);
        Ok(vec![RoomEvent::Broadcast(Message::CancelReady { user })])
    }

    fn maybe_start(&mut self, now: Instant) -> Vec<RoomEvent> {
        let RoomPhase::WaitForReady { chart, ready, .. } = &self.phase else {
            return Vec::new();
        };
        if !self.players.iter().all(|p| ready.contains(p)) {
            return Vec::new();
        }

        let chart = chart.clone();
        self.game_time = 0.0;
        self.phase = RoomPhase::Playing {
            chart,
            finished: HashMap::new(),
            aborted: HashSet::new(),
            since: now,
        };
        vec![
            RoomEvent::Broadcast(Message::StartPlaying),
            RoomEvent::State(RoomState::Playing),
        ]
    }

    /// Whether `user` may currently send play traffic.
    pub fn may_send_traffic(&self, user: i32) -> bool {
        matches!(self.phase, RoomPhase::Playing { .. }) && self.is_player(user)
    }

    /// Whether `user` may currently report a finished run. Checked before
    /// the record lookup; [`Room::played`] re-checks when committing.
    pub fn can_play_record(&self, user: i32) -> Result<(), &'static str> {
        if self.is_monitor(user) {
            return Err(reason::MONITOR_CANT_PLAY);
        }
        let RoomPhase::Playing { finished, aborted, .. } = &self.phase else {
            return Err(reason::INVALID_STATE);
        };
        if finished.contains_key(&user) || aborted.contains(&user) {
            return Err(reason::INVALID_STATE);
        }
        Ok(())
    }

    /// Record a finished run.
    pub fn played(
        &mut self,
        user: i32,
        record: PlayRecord,
    ) -> Result<Vec<RoomEvent>, &'static str> {
        if self.is_monitor(user) {
            return Err(reason::MONITOR_CANT_PLAY);
        }
        let RoomPhase::Playing { finished, aborted, .. } = &mut self.phase else {
            return Err(reason::INVALID_STATE);
        };
        if finished.contains_key(&user) || aborted.contains(&user) {
            return Err(reason::INVALID_STATE);
        }
        finished.insert(user, record);

        let mut events = vec![RoomEvent::Broadcast(Message::Played {
            user,
            score: record.score,
            accuracy: record.accuracy,
            full_combo: record.full_combo,
        })];
        events.extend(self.maybe_settle());
        Ok(events)
    }

    /// Record an abort; the player counts as finished for termination.
    pub fn abort(&mut self, user: i32) -> Result<Vec<RoomEvent>, &'static str> {
        if self.is_monitor(user) {
            return Err(reason::MONITOR_CANT_PLAY);
        }
        let RoomPhase::Playing { finished, aborted, .. } = &mut self.phase else {
            return Err(reason::INVALID_STATE);
        };
        if finished.contains_key(&user) || aborted.contains(&user) {
            return Err(reason::INVALID_STATE);
        }
        aborted.insert(user);

        let mut events = vec![RoomEvent::Broadcast(Message::Abort { user })];
        events.extend(self.maybe_settle());
        Ok(events)
    }

    fn maybe_settle(&mut self) -> Vec<RoomEvent> {
        let RoomPhase::Playing { chart, finished, aborted, .. } = &self.phase else {
            return Vec::new();
        };
        if !self.players.iter().all(|p| finished.contains_key(p) || aborted.contains(p)) {
            return Vec::new();
        }

        if finished.is_empty() {
            // Everyone bailed: the round never counted; keep the chart.
            let chart = chart.clone();
            let state = RoomState::SelectChart(Some(chart.id));
            self.phase = RoomPhase::SelectChart { chart: Some(chart) };
            return vec![
                RoomEvent::Broadcast(Message::CancelGame { user: self.host }),
                RoomEvent::State(state),
            ];
        }

        let record = GameEndRecord {
            room: self.id.clone(),
            chart_id: chart.id,
            records: finished.clone(),
        };
        let kept = self.cycle.then(|| chart.clone());
        let state = RoomState::SelectChart(kept.as_ref().map(|c| c.id));
        self.phase = RoomPhase::SelectChart { chart: kept };

        let mut events =
            vec![RoomEvent::Broadcast(Message::GameEnd), RoomEvent::State(state)];
        if self.replay {
            events.push(RoomEvent::Settled(record));
        }
        events
    }

    /// Remove a member, handing over the host role and unwinding the phase
    /// as needed. `name` feeds the leave broadcast.
    pub fn leave(&mut self, user: i32, name: &str, now: Instant) -> Vec<RoomEvent> {
        self.players.retain(|&p| p != user);
        self.monitors.retain(|&m| m != user);

        let mut events =
            vec![RoomEvent::Broadcast(Message::LeaveRoom { user, name: name.to_owned() })];

        let was_host = user == self.host;
        if was_host {
            self.host = self.players.first().copied().unwrap_or(VIRTUAL_HOST);
            if self.host != VIRTUAL_HOST {
                events.push(RoomEvent::Broadcast(Message::NewHost { user: self.host }));
                events.push(RoomEvent::HostChanged(self.host));
            }
        }

        match &mut self.phase {
            RoomPhase::SelectChart { .. } => {},
            RoomPhase::WaitForReady { chart, ready, .. } => {
                ready.remove(&user);
                if was_host {
                    // The host drove the countdown; fall back to setup.
                    let chart = chart.clone();
                    let state = RoomState::SelectChart(Some(chart.id));
                    self.phase = RoomPhase::SelectChart { chart: Some(chart) };
                    events.push(RoomEvent::State(state));
                } else {
                    events.extend(self.maybe_start(now));
                }
            },
            RoomPhase::Playing { finished, aborted, .. } => {
                finished.remove(&user);
                aborted.remove(&user);
                events.extend(self.maybe_settle());
            },
        }

        events
    }

    /// Whether the room has no members left.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty() && self.monitors.is_empty()
    }

    /// Member count cap.
    pub fn max_users(&self) -> usize {
        self.max_users
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid(s: &str) -> RoomId {
        s.try_into().expect("valid room id")
    }

    fn chart() -> Chart {
        Chart { id: 1, name: "test chart".to_owned() }
    }

    fn record() -> PlayRecord {
        PlayRecord { record_id: 1, score: 100, accuracy: 1.0, full_combo: true }
    }

    fn playing_room(players: &[i32]) -> Room {
        let now = Instant::now();
        let mut room = Room::new(rid("r"), players[0], 8, false);
        for &p in &players[1..] {
            room.add_member(p, false);
        }
        room.commit_chart(players[0], chart()).expect("select");
        room.request_start(players[0], now).expect("start");
        for &p in &players[1..] {
            room.ready(p, now).expect("ready");
        }
        assert!(matches!(room.wire_state(), RoomState::Playing));
        room
    }

    #[test]
    fn join_rules_run_in_order() {
        let mut room = Room::new(rid("r"), 100, 2, false);

        // Whitelist first.
        room.set_whitelist(Some(HashSet::from([100])));
        assert_eq!(room.validate_join(101, false, false), Err(reason::NOT_WHITELISTED));
        room.set_whitelist(None);

        // Then lock.
        room.set_locked(100, true).expect("host locks");
        assert_eq!(room.validate_join(101, false, false), Err(reason::ROOM_LOCKED));
        room.set_locked(100, false).expect("host unlocks");

        // Monitor privilege.
        assert_eq!(room.validate_join(101, true, false), Err(reason::CANT_MONITOR));
        assert_eq!(room.validate_join(101, true, true), Ok(()));

        // Capacity counts players and monitors.
        room.add_member(101, true);
        assert_eq!(room.validate_join(102, false, false), Err(reason::ROOM_FULL));
    }

    #[test]
    fn no_join_mid_game() {
        let room = playing_room(&[100, 101]);
        assert_eq!(room.validate_join(102, false, false), Err(reason::GAME_ONGOING));
    }

    #[test]
    fn host_succession_follows_insertion_order() {
        let now = Instant::now();
        let mut room = Room::new(rid("r"), 100, 8, false);
        room.add_member(101, false);
        room.add_member(102, false);

        let events = room.leave(100, "alice", now);
        assert_eq!(room.host(), 101);

        assert!(matches!(&events[0], RoomEvent::Broadcast(Message::LeaveRoom { user: 100, .. })));
        assert!(matches!(&events[1], RoomEvent::Broadcast(Message::NewHost { user: 101 })));
        assert!(matches!(&events[2], RoomEvent::HostChanged(101)));
    }

    #[test]
    fn non_host_commands_are_rejected() {
        let mut room = Room::new(rid("r"), 100, 8, false);
        room.add_member(101, false);

        assert_eq!(room.set_locked(101, true), Err(reason::ONLY_HOST));
        assert_eq!(room.set_cycle(101, true), Err(reason::ONLY_HOST));
        assert_eq!(room.can_select_chart(101), Err(reason::ONLY_HOST));
        assert_eq!(room.request_start(101, Instant::now()), Err(reason::ONLY_HOST));
    }

    #[test]
    fn start_requires_selected_chart() {
        let mut room = Room::new(rid("r"), 100, 8, false);
        assert_eq!(room.request_start(100, Instant::now()), Err(reason::NO_CHART_SELECTED));
    }

    #[test]
    fn lone_host_starts_playing_immediately() {
        let now = Instant::now();
        let mut room = Room::new(rid("r"), 100, 8, false);
        room.commit_chart(100, chart()).expect("select");

        let events = room.request_start(100, now).expect("start");
        assert!(matches!(room.wire_state(), RoomState::Playing));
        // GameStart, WaitingForReady, StartPlaying, Playing in one sweep.
        assert_eq!(events.len(), 4);
    }

    #[test]
    fn quorum_waits_for_every_player() {
        let now = Instant::now();
        let mut room = Room::new(rid("r"), 100, 8, false);
        room.add_member(101, false);
        room.add_member(102, false);
        room.commit_chart(100, chart()).expect("select");
        room.request_start(100, now).expect("start");

        room.ready(101, now).expect("ready");
        assert!(matches!(room.wire_state(), RoomState::WaitingForReady));

        let events = room.ready(102, now).expect("ready");
        assert!(matches!(room.wire_state(), RoomState::Playing));
        assert!(
            events.iter().any(|e| matches!(e, RoomEvent::Broadcast(Message::StartPlaying))),
        );
    }

    #[test]
    fn monitors_do_not_gate_the_quorum() {
        let now = Instant::now();
        let mut room = Room::new(rid("r"), 100, 8, false);
        room.add_member(200, true);
        room.commit_chart(100, chart()).expect("select");

        room.request_start(100, now).expect("start");
        assert!(matches!(room.wire_state(), RoomState::Playing));
        assert_eq!(room.ready(200, now), Err(reason::MONITOR_CANT_PLAY));
    }

    #[test]
    fn cancel_ready_reopens_quorum() {
        let now = Instant::now();
        let mut room = Room::new(rid("r"), 100, 8, false);
        room.add_member(101, false);
        room.commit_chart(100, chart()).expect("select");
        room.request_start(100, now).expect("start");

        room.cancel_ready(101).expect("cancel nothing");
        room.ready(101, now).expect("ready");
        assert!(matches!(room.wire_state(), RoomState::Playing));
    }

    #[test]
    fn settle_clears_chart_unless_cycling() {
        let mut room = playing_room(&[100]);
        room.played(100, record()).expect("played");
        assert_eq!(room.wire_state(), RoomState::SelectChart(None));

        let mut room = playing_room(&[100]);
        room.cycle = true;
        let events = room.played(100, record()).expect("played");
        assert_eq!(room.wire_state(), RoomState::SelectChart(Some(1)));
        assert!(events.iter().any(|e| matches!(e, RoomEvent::Broadcast(Message::GameEnd))));
    }

    #[test]
    fn replay_hook_fires_only_when_eligible() {
        let mut room = playing_room(&[100]);
        room.replay = true;
        let events = room.played(100, record()).expect("played");
        let settled = events.iter().find_map(|e| match e {
            RoomEvent::Settled(r) => Some(r),
            _ => None,
        });
        let settled = settled.expect("settled record");
        assert_eq!(settled.chart_id, 1);
        assert_eq!(settled.records[&100].score, 100);

        let mut room = playing_room(&[100]);
        let events = room.played(100, record()).expect("played");
        assert!(!events.iter().any(|e| matches!(e, RoomEvent::Settled(_))));
    }

    #[test]
    fn all_aborting_cancels_the_round() {
        let mut room = playing_room(&[100, 101]);
        room.abort(100).expect("abort");
        let events = room.abort(101).expect("abort");

        assert!(
            events
                .iter()
                .any(|e| matches!(e, RoomEvent::Broadcast(Message::CancelGame { user: 100 }))),
        );
        // Chart survives a cancelled round.
        assert_eq!(room.wire_state(), RoomState::SelectChart(Some(1)));
    }

    #[test]
    fn mixed_abort_and_play_still_ends_the_game() {
        let mut room = playing_room(&[100, 101]);
        room.abort(101).expect("abort");
        let events = room.played(100, record()).expect("played");
        assert!(events.iter().any(|e| matches!(e, RoomEvent::Broadcast(Message::GameEnd))));
    }

    #[test]
    fn double_played_is_rejected() {
        let mut room = playing_room(&[100, 101]);
        room.played(100, record()).expect("played");
        assert_eq!(room.played(100, record()), Err(reason::INVALID_STATE));
    }

    #[test]
    fn host_leaving_mid_countdown_reverts_to_setup() {
        let now = Instant::now();
        let mut room = Room::new(rid("r"), 100, 8, false);
        room.add_member(101, false);
        room.commit_chart(100, chart()).expect("select");
        room.request_start(100, now).expect("start");

        let events = room.leave(100, "alice", now);
        assert_eq!(room.host(), 101);
        // Chart is preserved through the fallback.
        assert_eq!(room.wire_state(), RoomState::SelectChart(Some(1)));
        assert!(
            events
                .iter()
                .any(|e| matches!(e, RoomEvent::State(RoomState::SelectChart(Some(1))))),
        );
    }

    #[test]
    fn player_leaving_mid_countdown_can_complete_quorum() {
        let now = Instant::now();
        let mut room = Room::new(rid("r"), 100, 8, false);
        room.add_member(101, false);
        room.add_member(102, false);
        room.commit_chart(100, chart()).expect("select");
        room.request_start(100, now).expect("start");
        room.ready(101, now).expect("ready");

        // 102 never readied; their departure completes the quorum.
        room.leave(102, "carol", now);
        assert!(matches!(room.wire_state(), RoomState::Playing));
    }

    #[test]
    fn player_leaving_mid_play_can_settle() {
        let now = Instant::now();
        let mut room = playing_room(&[100, 101]);
        room.played(100, record()).expect("played");

        let events = room.leave(101, "bob", now);
        assert!(events.iter().any(|e| matches!(e, RoomEvent::Broadcast(Message::GameEnd))));
    }

    #[test]
    fn capacity_invariant_holds() {
        let mut room = Room::new(rid("r"), 100, 3, false);
        room.add_member(101, false);
        room.add_member(200, true);
        assert_eq!(room.validate_join(300, false, false), Err(reason::ROOM_FULL));
        assert!(room.players().len() + room.monitors.len() <= room.max_users());
    }

    #[test]
    fn traffic_gate_requires_playing_player() {
        let room = playing_room(&[100]);
        assert!(room.may_send_traffic(100));
        assert!(!room.may_send_traffic(999));

        let setup = Room::new(rid("r2"), 100, 8, false);
        assert!(!setup.may_send_traffic(100));
    }
}
