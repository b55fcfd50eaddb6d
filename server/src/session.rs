//! Per-connection session worker
//!
//! One session task per accepted connection. The socket is split on
//! arrival: a reader task decodes frames and feeds them into the session's
//! event channel, while the session task owns the write half and drains
//! that channel. Peers, rooms, and timers reach a session the same way the
//! session's own connection does, so every write to the socket goes
//! through one task in order.

use log::{debug, error, info, warn};
use shared::{read_message, write_message, Color, Message, ProtocolError};
use std::sync::Arc;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::export;
use crate::room::{Member, MoveOutcome, Room, RoomKind, Rooms};

/// Events multiplexed into a session's main loop.
#[derive(Debug)]
pub enum SessionEvent {
    /// A decoded frame from this session's own connection.
    Inbound(Message),
    /// A message some other task wants written to this connection.
    Deliver(Message),
    /// Round follow-up: the session should move back to the lobby if it is
    /// still in `from_room` and the game has not restarted since `epoch`.
    ReturnToLobby { from_room: String, epoch: u64 },
    /// The connection died or sent undecodable bytes.
    Disconnected,
}

/// Wraps `text` as a chat line from the server itself.
pub fn server_chat(text: &str) -> Message {
    Message::Chat {
        text: format!("From SERVER: {}", text),
    }
}

struct Session {
    id: u64,
    name: String,
    color: Color,
    room: Arc<Room>,
    rooms: Arc<Rooms>,
    tx: mpsc::UnboundedSender<SessionEvent>,
    writer: OwnedWriteHalf,
}

/// Runs one connection to completion: joins the lobby, processes events
/// until the connection drops, then removes the session from whatever room
/// it ended up in.
pub async fn run(stream: TcpStream, id: u64, rooms: Arc<Rooms>) {
    let (reader, writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    spawn_reader(id, reader, tx.clone());

    let lobby = rooms.lobby();
    // The lobby is unbounded; this join cannot be rejected.
    let _ = lobby
        .join(Member {
            session_id: id,
            tx: tx.clone(),
        })
        .await;

    let mut session = Session {
        id,
        name: "Nameless".to_string(),
        color: Color::BLACK,
        room: lobby,
        rooms,
        tx,
        writer,
    };

    while let Some(event) = rx.recv().await {
        let result = match event {
            SessionEvent::Inbound(msg) => session.dispatch(msg).await,
            SessionEvent::Deliver(msg) => session.send(&msg).await,
            SessionEvent::ReturnToLobby { from_room, epoch } => {
                session.handle_return_to_lobby(&from_room, epoch).await
            }
            SessionEvent::Disconnected => break,
        };
        if let Err(e) = result {
            warn!(
                "Session {}: write failed, dropping connection: {}",
                session.id, e
            );
            break;
        }
    }

    session.room.leave(session.id).await;
    info!("Session {} closed", session.id);
}

/// Reader half of a connection: decodes frames into the event channel
/// until the first error, which for a framed stream always means the
/// connection is unusable.
fn spawn_reader(id: u64, mut reader: OwnedReadHalf, tx: mpsc::UnboundedSender<SessionEvent>) {
    tokio::spawn(async move {
        loop {
            match read_message(&mut reader).await {
                Ok(msg) => {
                    if tx.send(SessionEvent::Inbound(msg)).is_err() {
                        break;
                    }
                }
                Err(ProtocolError::Io(e)) => {
                    info!("Session {} disconnected: {}", id, e);
                    let _ = tx.send(SessionEvent::Disconnected);
                    break;
                }
                Err(e) => {
                    warn!(
                        "Session {}: undecodable frame, dropping connection: {}",
                        id, e
                    );
                    let _ = tx.send(SessionEvent::Disconnected);
                    break;
                }
            }
        }
    });
}

impl Session {
    fn member(&self) -> Member {
        Member {
            session_id: self.id,
            tx: self.tx.clone(),
        }
    }

    async fn send(&mut self, msg: &Message) -> Result<(), ProtocolError> {
        write_message(&mut self.writer, msg).await
    }

    async fn dispatch(&mut self, msg: Message) -> Result<(), ProtocolError> {
        match msg {
            Message::Chat { text } => {
                self.room.broadcast_chat(self.id, &self.name, &text).await;
                Ok(())
            }
            Message::Move { x, y } => self.handle_move(x, y).await,
            Message::Color { color } => self.handle_color(&color).await,
            Message::Name { name } => {
                info!("Session {}: renamed {:?} to {:?}", self.id, self.name, name);
                self.name = name;
                Ok(())
            }
            Message::SaveImage => self.handle_save_image().await,
            Message::Room { name } => self.handle_room_change(&name).await,
            Message::Cell { .. } | Message::GameEnd => {
                debug!(
                    "Session {}: ignoring server-only message from client",
                    self.id
                );
                Ok(())
            }
        }
    }

    async fn handle_move(&mut self, x: u8, y: u8) -> Result<(), ProtocolError> {
        match self.room.apply_move(x, y, self.color).await {
            MoveOutcome::Applied => Ok(()),
            MoveOutcome::GameIdle => {
                self.send(&server_chat("The number of players is not enough"))
                    .await
            }
            MoveOutcome::OutOfBounds => {
                self.send(&server_chat("That cell is outside the game field"))
                    .await
            }
            // Moves sent from the lobby are ignored
            MoveOutcome::NoGame => Ok(()),
        }
    }

    async fn handle_color(&mut self, color: &str) -> Result<(), ProtocolError> {
        if self.room.kind() == RoomKind::Lobby {
            return Ok(());
        }
        match Color::from_hex(color) {
            Some(parsed) => {
                self.color = parsed;
                Ok(())
            }
            None => {
                self.send(&server_chat("That color could not be parsed"))
                    .await
            }
        }
    }

    async fn handle_save_image(&mut self) -> Result<(), ProtocolError> {
        let Some(grid) = self.room.snapshot_grid().await else {
            return self
                .send(&server_chat("There is no game field to save in the lobby"))
                .await;
        };

        let path = self
            .rooms
            .config()
            .export_dir
            .join(export::snapshot_filename());
        match export::save_grid_to_image(&grid, &path) {
            Ok(()) => {
                let note = format!("Game field saved as {}", path.display());
                self.send(&server_chat(&note)).await
            }
            Err(e) => {
                error!("Session {}: grid export failed: {}", self.id, e);
                self.send(&server_chat("Saving the game field failed"))
                    .await
            }
        }
    }

    async fn handle_room_change(&mut self, target: &str) -> Result<(), ProtocolError> {
        let joined_target = self.change_room(target).await?;
        if joined_target {
            self.room
                .broadcast(server_chat(&format!("Welcome {}", self.name)))
                .await;
        }
        Ok(())
    }

    /// Leaves the current room and joins `target`, falling back to the
    /// lobby when the target is full or unknown. Any room change resets
    /// the brush color to the default. Returns true if the target itself
    /// was joined.
    async fn change_room(&mut self, target: &str) -> Result<bool, ProtocolError> {
        self.room.leave(self.id).await;
        self.color = Color::BLACK;

        let mut joined_target = false;
        let destination = match self.rooms.get(target) {
            Some(room) => match room.join(self.member()).await {
                Ok(()) => {
                    joined_target = true;
                    room
                }
                Err(_) => {
                    self.send(&server_chat("the room is busy, please wait in the lobby"))
                        .await?;
                    self.rejoin_lobby().await
                }
            },
            None => {
                self.send(&server_chat(&format!("There is no room named {}", target)))
                    .await?;
                self.rejoin_lobby().await
            }
        };

        self.room = destination;
        Ok(joined_target)
    }

    async fn rejoin_lobby(&self) -> Arc<Room> {
        let lobby = self.rooms.lobby();
        // Unbounded, cannot be rejected.
        let _ = lobby.join(self.member()).await;
        lobby
    }

    /// Timer-driven lobby return after a finished round. Ignored if the
    /// session already moved elsewhere, or if the room's game restarted
    /// after the round this return was scheduled for. The epoch check and
    /// the removal happen under the room lock, so a return honored here
    /// can never end a round it did not belong to.
    async fn handle_return_to_lobby(
        &mut self,
        from_room: &str,
        epoch: u64,
    ) -> Result<(), ProtocolError> {
        if self.room.name() != from_room || !self.room.leave_after_round(self.id, epoch).await {
            debug!(
                "Session {}: stale lobby return for room {} ignored",
                self.id, from_room
            );
            return Ok(());
        }

        self.color = Color::BLACK;
        self.room = self.rejoin_lobby().await;
        self.send(&Message::GameEnd).await
    }
}
