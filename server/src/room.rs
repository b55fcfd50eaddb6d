//! Room membership and game lifecycle management
//!
//! This module handles the server-side grouping of sessions into rooms:
//! - Membership tracking and capacity enforcement (lobby unbounded, match
//!   rooms capped at two players)
//! - Game start/stop as a pure function of membership count
//! - Round and lobby-return timers, epoch-checked against the game they
//!   were armed for
//! - Fan-out of chat, cell updates, and server notices to room members
//!
//! Every membership mutation and the game re-evaluation it triggers happen
//! under one acquisition of the room's lock, which is the discipline that
//! rules out phantom game starts when two sessions join concurrently.

use log::{debug, info};
use shared::{Color, Grid, Message, LOBBY_ROOM};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::game::Game;
use crate::session::SessionEvent;
use crate::ServerConfig;

/// Player limit for match rooms. A match room's game runs exactly while
/// the room is full.
pub const MATCH_CAPACITY: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomKind {
    /// Unbounded waiting room, no game attached.
    Lobby,
    /// Two-player room owning a [`Game`].
    Match,
}

/// A room's record of one member session: its id plus the channel that
/// reaches the session task's write path.
#[derive(Debug)]
pub struct Member {
    pub session_id: u64,
    pub tx: mpsc::UnboundedSender<SessionEvent>,
}

impl Member {
    /// Queues `msg` for transmission on this member's connection. A closed
    /// channel means the session is already shutting down; the message is
    /// dropped.
    pub fn deliver(&self, msg: Message) {
        let _ = self.tx.send(SessionEvent::Deliver(msg));
    }
}

/// Join rejection: the target match room is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomFull;

/// Result of routing a move to a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Cell written and broadcast to the room.
    Applied,
    /// The room is not full, so no round is running; nothing written.
    GameIdle,
    /// Coordinates fall outside the grid; nothing written.
    OutOfBounds,
    /// The room has no game (lobby); moves are silently ignored.
    NoGame,
}

struct RoomState {
    members: Vec<Member>,
    game: Option<Game>,
}

/// A named grouping of sessions, created at startup and never destroyed.
pub struct Room {
    name: String,
    kind: RoomKind,
    config: Arc<ServerConfig>,
    state: Mutex<RoomState>,
}

impl Room {
    fn new(name: &str, kind: RoomKind, config: Arc<ServerConfig>) -> Arc<Self> {
        let game = match kind {
            RoomKind::Lobby => None,
            RoomKind::Match => Some(Game::new()),
        };
        Arc::new(Self {
            name: name.to_string(),
            kind,
            config,
            state: Mutex::new(RoomState {
                members: Vec::new(),
                game,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> RoomKind {
        self.kind
    }

    pub async fn member_count(&self) -> usize {
        self.state.lock().await.members.len()
    }

    pub async fn game_active(&self) -> bool {
        self.state
            .lock()
            .await
            .game
            .as_ref()
            .map(Game::is_active)
            .unwrap_or(false)
    }

    /// Adds `member` if the room has space (the lobby always does), then
    /// re-evaluates the game status. The membership check, insertion, and
    /// re-evaluation are one critical section.
    pub async fn join(self: &Arc<Self>, member: Member) -> Result<(), RoomFull> {
        let mut state = self.state.lock().await;
        if self.kind == RoomKind::Match && state.members.len() >= MATCH_CAPACITY {
            return Err(RoomFull);
        }

        info!("Session {} joined room {}", member.session_id, self.name);
        state.members.push(member);
        self.check_game_status(&mut state);
        Ok(())
    }

    /// Removes the session from membership unconditionally, then
    /// re-evaluates the game status.
    pub async fn leave(self: &Arc<Self>, session_id: u64) {
        let mut state = self.state.lock().await;
        let before = state.members.len();
        state.members.retain(|m| m.session_id != session_id);
        if state.members.len() < before {
            info!("Session {} left room {}", session_id, self.name);
        }
        self.check_game_status(&mut state);
    }

    /// Game status is a pure function of membership: a full match room
    /// runs, anything less is idle. This is the only start/stop trigger.
    fn check_game_status(self: &Arc<Self>, state: &mut RoomState) {
        let RoomState { members, game } = state;
        let Some(game) = game.as_mut() else {
            return;
        };

        if members.len() == MATCH_CAPACITY && !game.is_active() {
            let epoch = game.start(members);
            info!(
                "Room {}: game started (epoch {}, theme {})",
                self.name,
                epoch,
                game.theme()
            );
            self.arm_round_timer(epoch);
        } else if members.len() < MATCH_CAPACITY && game.is_active() {
            // Membership drop: the round ends now, nobody is forced back
            // to the lobby.
            info!("Room {}: game ended, not enough players", self.name);
            game.finish(members, &self.name, &self.config.export_dir);
        }
    }

    fn arm_round_timer(self: &Arc<Self>, epoch: u64) {
        let room = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(room.config.round_duration).await;
            room.round_expired(epoch).await;
        });
    }

    /// Round timer expiry. Validates the epoch under the room lock first;
    /// a timer armed for a round that already ended is a no-op.
    async fn round_expired(self: &Arc<Self>, epoch: u64) {
        let mut state = self.state.lock().await;
        let RoomState { members, game } = &mut *state;
        let Some(game) = game.as_mut() else {
            return;
        };
        if !game.is_active() || game.epoch() != epoch {
            debug!(
                "Room {}: stale round timer (epoch {}) ignored",
                self.name, epoch
            );
            return;
        }

        info!("Room {}: round time is up", self.name);
        game.finish(members, &self.name, &self.config.export_dir);

        // Give the players a moment with the result, then push them back
        // to the lobby. Targets are captured now; the receiving sessions
        // re-validate the room name and epoch before honoring the event.
        let targets: Vec<_> = members.iter().map(|m| m.tx.clone()).collect();
        let room_name = self.name.clone();
        let delay = self.config.lobby_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            for tx in targets {
                let _ = tx.send(SessionEvent::ReturnToLobby {
                    from_room: room_name.clone(),
                    epoch,
                });
            }
        });
    }

    /// Removes the session as the follow-up to a timer-ended round, but
    /// only if the game's epoch still matches the round the return was
    /// scheduled for. A restarted game means the return is stale; the
    /// member stays and the caller must not act on it. The epoch check and
    /// the removal are one critical section.
    pub async fn leave_after_round(self: &Arc<Self>, session_id: u64, epoch: u64) -> bool {
        let mut state = self.state.lock().await;
        let current = state.game.as_ref().map(Game::epoch);
        if current != Some(epoch) {
            debug!(
                "Room {}: stale lobby return (epoch {}) for session {} ignored",
                self.name, epoch, session_id
            );
            return false;
        }

        info!("Session {} returned to the lobby from room {}", session_id, self.name);
        state.members.retain(|m| m.session_id != session_id);
        self.check_game_status(&mut state);
        true
    }

    /// Sends `msg` to every current member.
    pub async fn broadcast(&self, msg: Message) {
        let state = self.state.lock().await;
        for member in &state.members {
            member.deliver(msg.clone());
        }
    }

    /// Chat fan-out: the sender sees its own line echoed as `From YOU:`,
    /// everyone else sees `From <sender>:`.
    pub async fn broadcast_chat(&self, sender_id: u64, sender_name: &str, text: &str) {
        let state = self.state.lock().await;
        for member in &state.members {
            let prefixed = if member.session_id == sender_id {
                format!("From YOU: {}", text)
            } else {
                format!("From {}: {}", sender_name, text)
            };
            member.deliver(Message::Chat { text: prefixed });
        }
    }

    /// Routes a move to the room's game. On success the resulting cell
    /// update is broadcast to all members before the lock is released, so
    /// the fan-out set matches the membership the move was validated
    /// against.
    pub async fn apply_move(&self, x: u8, y: u8, color: Color) -> MoveOutcome {
        let mut state = self.state.lock().await;
        let RoomState { members, game } = &mut *state;
        let Some(game) = game.as_mut() else {
            return MoveOutcome::NoGame;
        };
        if !game.is_active() {
            return MoveOutcome::GameIdle;
        }
        if !game.apply_move(x as usize, y as usize, color) {
            return MoveOutcome::OutOfBounds;
        }

        let cell = Message::Cell {
            x,
            y,
            color: color.to_hex(),
        };
        for member in members.iter() {
            member.deliver(cell.clone());
        }
        MoveOutcome::Applied
    }

    /// Clones the current grid for export, or `None` in the lobby.
    pub async fn snapshot_grid(&self) -> Option<Grid> {
        self.state
            .lock()
            .await
            .game
            .as_ref()
            .map(|game| game.grid().clone())
    }
}

/// The process-wide room registry: one lobby plus N match rooms named
/// `"1"..=N`. Built once at startup; only membership inside rooms changes
/// afterwards.
pub struct Rooms {
    rooms: HashMap<String, Arc<Room>>,
    lobby: Arc<Room>,
    config: Arc<ServerConfig>,
}

impl Rooms {
    pub fn new(match_rooms: usize, config: Arc<ServerConfig>) -> Self {
        let lobby = Room::new(LOBBY_ROOM, RoomKind::Lobby, Arc::clone(&config));

        let mut rooms = HashMap::new();
        rooms.insert(LOBBY_ROOM.to_string(), Arc::clone(&lobby));
        for i in 1..=match_rooms {
            let name = i.to_string();
            rooms.insert(
                name.clone(),
                Room::new(&name, RoomKind::Match, Arc::clone(&config)),
            );
        }
        info!("Room registry ready: lobby + {} match rooms", match_rooms);

        Self {
            rooms,
            lobby,
            config,
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Room>> {
        self.rooms.get(name).cloned()
    }

    pub fn lobby(&self) -> Arc<Room> {
        Arc::clone(&self.lobby)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config(round_ms: u64, delay_ms: u64) -> Arc<ServerConfig> {
        Arc::new(ServerConfig {
            round_duration: Duration::from_millis(round_ms),
            lobby_delay: Duration::from_millis(delay_ms),
            export_dir: std::env::temp_dir(),
        })
    }

    fn test_member(id: u64) -> (Member, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Member { session_id: id, tx }, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn chat_texts(events: &[SessionEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|event| match event {
                SessionEvent::Deliver(Message::Chat { text }) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_match_room_capacity() {
        let room = Room::new("1", RoomKind::Match, test_config(60_000, 60_000));
        let (a, _rx_a) = test_member(1);
        let (b, _rx_b) = test_member(2);
        let (c, _rx_c) = test_member(3);

        assert!(room.join(a).await.is_ok());
        assert!(room.join(b).await.is_ok());
        assert_eq!(room.join(c).await, Err(RoomFull));
        assert_eq!(room.member_count().await, 2);
    }

    #[tokio::test]
    async fn test_lobby_is_unbounded() {
        let room = Room::new(LOBBY_ROOM, RoomKind::Lobby, test_config(60_000, 60_000));
        for id in 0..5 {
            let (member, _rx) = test_member(id);
            assert!(room.join(member).await.is_ok());
        }
        assert_eq!(room.member_count().await, 5);
        assert!(!room.game_active().await);
    }

    #[tokio::test]
    async fn test_game_starts_when_room_fills() {
        let room = Room::new("1", RoomKind::Match, test_config(60_000, 60_000));
        let (a, mut rx_a) = test_member(1);
        let (b, mut rx_b) = test_member(2);

        room.join(a).await.unwrap();
        assert!(!room.game_active().await);

        room.join(b).await.unwrap();
        assert!(room.game_active().await);

        for rx in [&mut rx_a, &mut rx_b] {
            let texts = chat_texts(&drain(rx));
            assert!(
                texts.iter().any(|t| t.contains("your theme is")),
                "expected a theme notice, got {:?}",
                texts
            );
        }
    }

    #[tokio::test]
    async fn test_game_ends_when_member_leaves() {
        let room = Room::new("1", RoomKind::Match, test_config(60_000, 60_000));
        let (a, mut rx_a) = test_member(1);
        let (b, _rx_b) = test_member(2);

        room.join(a).await.unwrap();
        room.join(b).await.unwrap();
        drain(&mut rx_a);

        room.leave(2).await;
        assert!(!room.game_active().await);
        assert_eq!(room.member_count().await, 1);

        let texts = chat_texts(&drain(&mut rx_a));
        assert!(texts.iter().any(|t| t.contains("The game is ended")));
    }

    #[tokio::test]
    async fn test_rejected_join_leaves_room_untouched() {
        let room = Room::new("1", RoomKind::Match, test_config(60_000, 60_000));
        let (a, _rx_a) = test_member(1);
        let (b, _rx_b) = test_member(2);
        let (c, _rx_c) = test_member(3);

        room.join(a).await.unwrap();
        room.join(b).await.unwrap();
        assert_eq!(room.join(c).await, Err(RoomFull));

        assert_eq!(room.member_count().await, 2);
        assert!(room.game_active().await);
    }

    #[tokio::test]
    async fn test_move_rejected_without_full_room() {
        let room = Room::new("1", RoomKind::Match, test_config(60_000, 60_000));
        let (a, _rx_a) = test_member(1);
        room.join(a).await.unwrap();

        let outcome = room.apply_move(3, 4, Color::BLACK).await;
        assert_eq!(outcome, MoveOutcome::GameIdle);
    }

    #[tokio::test]
    async fn test_move_out_of_bounds_distinct_from_idle() {
        let room = Room::new("1", RoomKind::Match, test_config(60_000, 60_000));
        let (a, _rx_a) = test_member(1);
        let (b, _rx_b) = test_member(2);
        room.join(a).await.unwrap();
        room.join(b).await.unwrap();
        assert!(room.game_active().await);

        let outcome = room.apply_move(16, 0, Color::BLACK).await;
        assert_eq!(outcome, MoveOutcome::OutOfBounds);
    }

    #[tokio::test]
    async fn test_move_ignored_in_lobby() {
        let room = Room::new(LOBBY_ROOM, RoomKind::Lobby, test_config(60_000, 60_000));
        let (a, _rx_a) = test_member(1);
        room.join(a).await.unwrap();

        assert_eq!(
            room.apply_move(0, 0, Color::BLACK).await,
            MoveOutcome::NoGame
        );
    }

    #[tokio::test]
    async fn test_move_broadcasts_cell_to_both_members() {
        let room = Room::new("1", RoomKind::Match, test_config(60_000, 60_000));
        let (a, mut rx_a) = test_member(1);
        let (b, mut rx_b) = test_member(2);
        room.join(a).await.unwrap();
        room.join(b).await.unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        let red = Color { r: 255, g: 0, b: 0 };
        assert_eq!(room.apply_move(3, 4, red).await, MoveOutcome::Applied);

        for rx in [&mut rx_a, &mut rx_b] {
            match rx.try_recv().unwrap() {
                SessionEvent::Deliver(Message::Cell { x, y, color }) => {
                    assert_eq!((x, y), (3, 4));
                    assert_eq!(color, "#FF0000");
                }
                other => panic!("expected cell update, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_round_timer_ends_game_and_schedules_lobby_return() {
        let room = Room::new("1", RoomKind::Match, test_config(50, 50));
        let (a, mut rx_a) = test_member(1);
        let (b, _rx_b) = test_member(2);
        room.join(a).await.unwrap();
        room.join(b).await.unwrap();
        assert!(room.game_active().await);

        // Round (50ms) plus lobby delay (50ms), with slack
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!room.game_active().await);

        let events = drain(&mut rx_a);
        assert!(events.iter().any(
            |e| matches!(e, SessionEvent::ReturnToLobby { from_room, epoch: 1 } if from_room == "1")
        ));
        let texts = chat_texts(&events);
        assert!(texts.iter().any(|t| t.contains("The game is ended")));
    }

    #[tokio::test]
    async fn test_post_round_leave_honored_while_epoch_matches() {
        let room = Room::new("1", RoomKind::Match, test_config(60_000, 60_000));
        let (a, _rx_a) = test_member(1);
        let (b, _rx_b) = test_member(2);
        room.join(a).await.unwrap();
        room.join(b).await.unwrap();
        room.leave(2).await;
        assert!(!room.game_active().await);

        // Round 1 ended and nothing restarted; the return goes through
        assert!(room.leave_after_round(1, 1).await);
        assert_eq!(room.member_count().await, 0);
    }

    #[tokio::test]
    async fn test_post_round_leave_ignored_after_game_restarts() {
        let room = Room::new("1", RoomKind::Match, test_config(60_000, 60_000));
        let (a, _rx_a) = test_member(1);
        let (b, _rx_b) = test_member(2);
        room.join(a).await.unwrap();
        room.join(b).await.unwrap();

        // Round 1 ends when b leaves; a new partner restarts the game
        room.leave(2).await;
        let (c, _rx_c) = test_member(3);
        room.join(c).await.unwrap();
        assert!(room.game_active().await);

        // A return scheduled for round 1 must not touch round 2
        assert!(!room.leave_after_round(1, 1).await);
        assert_eq!(room.member_count().await, 2);
        assert!(room.game_active().await);
    }

    #[tokio::test]
    async fn test_stale_round_timer_ignores_restarted_game() {
        let room = Room::new("1", RoomKind::Match, test_config(200, 60_000));
        let (a, _rx_a) = test_member(1);
        let (b, _rx_b) = test_member(2);
        room.join(a).await.unwrap();
        room.join(b).await.unwrap();

        // End the first round early, then restart with a new epoch
        tokio::time::sleep(Duration::from_millis(50)).await;
        room.leave(2).await;
        assert!(!room.game_active().await);
        let (b2, _rx_b2) = test_member(3);
        room.join(b2).await.unwrap();
        assert!(room.game_active().await);

        // First round's timer fires around t=200ms; the restarted game
        // (armed around t=50ms, ending around t=250ms) must survive it.
        tokio::time::sleep(Duration::from_millis(170)).await;
        assert!(room.game_active().await);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!room.game_active().await);
    }

    #[tokio::test]
    async fn test_registry_layout() {
        let rooms = Rooms::new(2, test_config(60_000, 60_000));

        assert_eq!(rooms.lobby().kind(), RoomKind::Lobby);
        assert_eq!(rooms.get("1").map(|r| r.kind()), Some(RoomKind::Match));
        assert_eq!(rooms.get("2").map(|r| r.kind()), Some(RoomKind::Match));
        assert!(rooms.get("3").is_none());
        assert!(rooms.get("lobby").is_none());
    }
}
