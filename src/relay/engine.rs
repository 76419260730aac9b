//! Per-stream chat relay.
//!
//! A [`ChatSession`] binds one participant to one room. While it runs, the
//! ingest duty broadcasts everything the client sends and a spawned delivery
//! duty drains the participant's mailbox back to the client, parking on the
//! mailbox wake signal whenever it is empty.

use std::sync::Arc;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use super::metadata::CallMetadata;
use super::registry::RegistryHandle;
use super::room::{Delivery, Room};
use super::types::{ChatMessage, ParticipantId, RelayError, RoomId};

/// How the stream is being closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Closing {
    /// End of input: flush queued mail, then stop
    Orderly,
    /// Transport failure or eviction: stop without flushing
    Abort,
}

/// A validated chat stream, ready to relay
#[derive(Debug)]
pub struct ChatSession {
    room: Arc<Room>,
    participant: ParticipantId,
}

impl ChatSession {
    /// Resolve the routing metadata and check the participant occupies the
    /// room. Nothing is mutated on failure.
    pub async fn establish(
        registry: &RegistryHandle,
        metadata: &CallMetadata,
    ) -> Result<Self, RelayError> {
        let participant = metadata.participant_id()?;
        let room_id = metadata.room_id()?;

        let room = registry.find_room(room_id).await?;
        Self::bind(room, participant)
    }

    /// Bind to an already resolved room
    pub fn bind(room: Arc<Room>, participant: ParticipantId) -> Result<Self, RelayError> {
        if !room.contains(participant) {
            return Err(RelayError::ParticipantNotFound(participant));
        }
        Ok(Self { room, participant })
    }

    pub fn room_id(&self) -> RoomId {
        self.room.id()
    }

    pub fn participant(&self) -> ParticipantId {
        self.participant
    }

    /// Relay until the client ends its input or either side fails.
    ///
    /// Closing the stream leaves the participant in the room.
    pub async fn run<I, O>(self, mut inbound: I, outbound: O) -> Result<(), RelayError>
    where
        I: Stream<Item = Result<ChatMessage, RelayError>> + Unpin + Send,
        O: Sink<ChatMessage, Error = RelayError> + Unpin + Send + 'static,
    {
        let ChatSession { room, participant } = self;
        info!(room_id = %room.id(), participant_id = %participant, "chat stream opened");

        let (closing_tx, closing_rx) = watch::channel(None);
        let mut delivery = tokio::spawn(deliver(
            Arc::clone(&room),
            participant,
            outbound,
            closing_rx,
        ));

        let ingest = loop {
            tokio::select! {
                next = inbound.next() => match next {
                    Some(Ok(message)) => {
                        if let Err(e) = room.broadcast(participant, &message) {
                            break Err(e);
                        }
                    }
                    Some(Err(e)) => break Err(e),
                    None => break Ok(()),
                },

                delivered = &mut delivery => {
                    let result = joined(delivered);
                    if let Err(e) = &result {
                        warn!(room_id = %room.id(), participant_id = %participant, error = %e, "delivery stopped");
                    }
                    info!(room_id = %room.id(), participant_id = %participant, "chat stream closed");
                    return result;
                }
            }
        };

        let closing = match &ingest {
            Ok(()) => Closing::Orderly,
            Err(e) => {
                warn!(room_id = %room.id(), participant_id = %participant, error = %e, "ingest stopped");
                Closing::Abort
            }
        };
        let _ = closing_tx.send(Some(closing));

        let delivered = joined(delivery.await);
        info!(room_id = %room.id(), participant_id = %participant, ?closing, "chat stream closed");
        ingest.and(delivered)
    }
}

fn joined(result: Result<Result<(), RelayError>, JoinError>) -> Result<(), RelayError> {
    result.map_err(|e| RelayError::Internal(format!("delivery task failed: {e}")))?
}

/// Delivery duty: forward mailbox contents to the client in append order.
async fn deliver<O>(
    room: Arc<Room>,
    participant: ParticipantId,
    mut outbound: O,
    mut closing: watch::Receiver<Option<Closing>>,
) -> Result<(), RelayError>
where
    O: Sink<ChatMessage, Error = RelayError> + Unpin,
{
    loop {
        let state = *closing.borrow_and_update();
        match state {
            Some(Closing::Abort) => return Ok(()),
            Some(Closing::Orderly) => {
                // room may already be gone; nothing left to flush then
                let remaining = room.drain(participant).unwrap_or_default();
                return send_all(&mut outbound, remaining).await;
            }
            None => {}
        }

        match room.poll_mailbox(participant)? {
            Delivery::Mail(batch) => {
                debug!(participant_id = %participant, count = batch.len(), "delivering mail");
                send_all(&mut outbound, batch).await?;
            }
            Delivery::Idle(wake) => {
                tokio::select! {
                    _ = wake.notified() => {}
                    changed = closing.changed() => {
                        if changed.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

async fn send_all<O>(outbound: &mut O, batch: Vec<ChatMessage>) -> Result<(), RelayError>
where
    O: Sink<ChatMessage, Error = RelayError> + Unpin,
{
    for message in batch {
        outbound.feed(message).await?;
    }
    outbound.flush().await
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::time::Duration;

    use futures_util::{sink, stream};
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    use super::*;
    use crate::relay::metadata::{PARTICIPANT_ID_KEY, ROOM_ID_KEY};
    use crate::relay::registry::Registry;
    use crate::relay::types::ErrorCode;

    type Inbound = Pin<Box<dyn Stream<Item = Result<ChatMessage, RelayError>> + Send>>;
    type Outbound = Pin<Box<dyn Sink<ChatMessage, Error = RelayError> + Send>>;

    const WAIT: Duration = Duration::from_secs(2);

    struct Client {
        input: mpsc::UnboundedSender<Result<ChatMessage, RelayError>>,
        output: mpsc::UnboundedReceiver<ChatMessage>,
        task: JoinHandle<Result<(), RelayError>>,
    }

    fn pipes() -> (
        Inbound,
        Outbound,
        mpsc::UnboundedSender<Result<ChatMessage, RelayError>>,
        mpsc::UnboundedReceiver<ChatMessage>,
    ) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let inbound = stream::unfold(in_rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        let outbound = sink::unfold(out_tx, |tx, message: ChatMessage| async move {
            tx.send(message)
                .map_err(|_| RelayError::Unavailable("client gone".to_string()))?;
            Ok::<_, RelayError>(tx)
        });

        (Box::pin(inbound), Box::pin(outbound), in_tx, out_rx)
    }

    fn connect(room: &Arc<Room>, participant: ParticipantId) -> Client {
        let session = ChatSession::bind(Arc::clone(room), participant).unwrap();
        let (inbound, outbound, input, output) = pipes();
        let task = tokio::spawn(session.run(inbound, outbound));
        Client {
            input,
            output,
            task,
        }
    }

    fn lobby(occupants: &[u32]) -> Arc<Room> {
        let room = Arc::new(Room::new(RoomId::new(10), "lobby"));
        for &id in occupants {
            room.enter(ParticipantId::new(id)).unwrap();
        }
        room
    }

    async fn recv(client: &mut Client) -> ChatMessage {
        timeout(WAIT, client.output.recv())
            .await
            .expect("timed out waiting for mail")
            .expect("output closed")
    }

    #[tokio::test]
    async fn relays_to_other_occupants_only() {
        let room = lobby(&[1, 2]);
        let mut alice = connect(&room, ParticipantId::new(1));
        let mut bob = connect(&room, ParticipantId::new(2));

        alice.input.send(Ok("hi".into())).unwrap();
        assert_eq!(recv(&mut bob).await, ChatMessage::from("hi"));

        bob.input.send(Ok("hello".into())).unwrap();
        assert_eq!(recv(&mut alice).await, ChatMessage::from("hello"));

        // alice never sees her own line
        assert!(alice.output.try_recv().is_err());

        drop(alice.input);
        drop(bob.input);
        assert_eq!(alice.task.await.unwrap(), Ok(()));
        assert_eq!(bob.task.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn delivers_in_broadcast_order() {
        let room = lobby(&[1, 2]);
        let mut bob = connect(&room, ParticipantId::new(2));

        for n in 0..50 {
            room.broadcast(ParticipantId::new(1), &ChatMessage::new(n.to_string()))
                .unwrap();
        }

        for n in 0..50 {
            assert_eq!(recv(&mut bob).await.text, n.to_string());
        }
        drop(bob.input);
        bob.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn end_of_input_flushes_queued_mail() {
        let room = lobby(&[1, 2]);
        room.broadcast(ParticipantId::new(1), &"queued".into())
            .unwrap();

        let session = ChatSession::bind(Arc::clone(&room), ParticipantId::new(2)).unwrap();
        let (_, outbound, _, mut output) = pipes();
        let result = session
            .run(stream::empty::<Result<ChatMessage, RelayError>>(), outbound)
            .await;

        assert_eq!(result, Ok(()));
        assert_eq!(output.recv().await, Some(ChatMessage::from("queued")));
    }

    #[tokio::test]
    async fn transport_error_skips_flush() {
        let room = lobby(&[1, 2]);
        room.broadcast(ParticipantId::new(1), &"queued".into())
            .unwrap();

        let session = ChatSession::bind(Arc::clone(&room), ParticipantId::new(2)).unwrap();
        let (_, outbound, _, mut output) = pipes();
        let inbound = stream::iter([Err(RelayError::Unavailable("reset".to_string()))]);
        let result = session.run(inbound, outbound).await;

        assert_eq!(result.unwrap_err().code(), ErrorCode::Unavailable);
        assert_eq!(output.recv().await, None);
        assert_eq!(
            room.drain(ParticipantId::new(2)).unwrap(),
            vec![ChatMessage::from("queued")]
        );
    }

    #[tokio::test]
    async fn closing_stream_keeps_occupancy() {
        let room = lobby(&[1, 2]);
        let bob = connect(&room, ParticipantId::new(2));

        drop(bob.input);
        bob.task.await.unwrap().unwrap();

        assert!(room.contains(ParticipantId::new(2)));
        room.broadcast(ParticipantId::new(1), &"later".into())
            .unwrap();
        assert_eq!(
            room.drain(ParticipantId::new(2)).unwrap(),
            vec![ChatMessage::from("later")]
        );
    }

    #[tokio::test]
    async fn transport_error_is_surfaced() {
        let room = lobby(&[1, 2]);
        let bob = connect(&room, ParticipantId::new(2));

        bob.input
            .send(Err(RelayError::Unavailable("reset".to_string())))
            .unwrap();

        let result = timeout(WAIT, bob.task).await.unwrap().unwrap();
        assert_eq!(result.unwrap_err().code(), ErrorCode::Unavailable);
    }

    #[tokio::test]
    async fn failed_delivery_stops_stream() {
        let room = lobby(&[1, 2]);
        let Client {
            input: _input,
            output,
            task,
        } = connect(&room, ParticipantId::new(2));
        drop(output);

        room.broadcast(ParticipantId::new(1), &"lost".into())
            .unwrap();

        let result = timeout(WAIT, task).await.unwrap().unwrap();
        assert_eq!(result.unwrap_err().code(), ErrorCode::Unavailable);
    }

    #[tokio::test]
    async fn exit_evicts_running_stream() {
        let room = lobby(&[1, 2]);
        let bob = connect(&room, ParticipantId::new(2));
        tokio::task::yield_now().await;

        room.exit(ParticipantId::new(2));

        let result = timeout(WAIT, bob.task).await.unwrap().unwrap();
        assert_eq!(
            result,
            Err(RelayError::ParticipantNotFound(ParticipantId::new(2)))
        );
    }

    #[tokio::test]
    async fn room_removal_evicts_running_stream() {
        let room = lobby(&[1, 2]);
        let bob = connect(&room, ParticipantId::new(2));
        tokio::task::yield_now().await;

        room.close();

        let result = timeout(WAIT, bob.task).await.unwrap().unwrap();
        assert_eq!(result, Err(RelayError::RoomNotFound(RoomId::new(10))));
    }

    #[tokio::test]
    async fn establish_validates_metadata_and_occupancy() {
        let registry = RegistryHandle::spawn_with(Registry::with_seed(9));
        let participant = registry.login().await.unwrap();
        let lobby = registry.create_room("lobby").await.unwrap();

        let missing = CallMetadata::new().with(PARTICIPANT_ID_KEY, participant);
        assert_eq!(
            ChatSession::establish(&registry, &missing).await.unwrap_err(),
            RelayError::Unauthenticated(ROOM_ID_KEY)
        );

        let malformed = missing.clone().with(ROOM_ID_KEY, "lobby");
        assert_eq!(
            ChatSession::establish(&registry, &malformed)
                .await
                .unwrap_err()
                .code(),
            ErrorCode::InvalidArgument
        );

        let unknown = missing.clone().with(ROOM_ID_KEY, lobby.room_id.get().wrapping_add(1));
        assert_eq!(
            ChatSession::establish(&registry, &unknown)
                .await
                .unwrap_err()
                .code(),
            ErrorCode::NotFound
        );

        let outside = missing.with(ROOM_ID_KEY, lobby.room_id);
        assert_eq!(
            ChatSession::establish(&registry, &outside).await.unwrap_err(),
            RelayError::ParticipantNotFound(participant)
        );

        let room = registry.find_room(lobby.room_id).await.unwrap();
        assert_eq!(room.occupant_count(), 0);

        room.enter(participant).unwrap();
        let session = ChatSession::establish(&registry, &routing(participant, lobby.room_id))
            .await
            .unwrap();
        assert_eq!(session.room_id(), lobby.room_id);
        assert_eq!(session.participant(), participant);
    }

    fn routing(participant: ParticipantId, room: RoomId) -> CallMetadata {
        CallMetadata::new()
            .with(PARTICIPANT_ID_KEY, participant)
            .with(ROOM_ID_KEY, room)
    }
}
