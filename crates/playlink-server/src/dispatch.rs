//! Routing of inbound frames to the adapter.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use playlink_wire::{
    ClientInfo, Control, DecodeError, Frame, Item, ItemList, MessageError, MessageType, Request,
    Serializable, decode, serialize_item, serialize_message,
};

use crate::adapter::PlayerAdapter;
use crate::connection::Session;

/// A decoded client-to-server message.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Ignore,
    ClientInfo(ClientInfo),
    Control(Control),
    ItemRequest(Request),
    ListRequest(Request),
    Bye,
    /// Unknown tags and server-to-client types. Dropped.
    Unhandled(MessageType),
}

impl ClientMessage {
    /// Decode the payload of a structurally valid frame.
    pub fn decode(frame: &Frame) -> Result<Self, DecodeError> {
        let payload = frame.payload.as_slice();
        Ok(match frame.msg_type {
            MessageType::Ignore => ClientMessage::Ignore,
            MessageType::Bye => ClientMessage::Bye,
            MessageType::ClientInfo => ClientMessage::ClientInfo(decode(payload)?),
            MessageType::Control => ClientMessage::Control(decode(payload)?),
            MessageType::ItemRequest => ClientMessage::ItemRequest(decode(payload)?),
            MessageType::ListRequest => ClientMessage::ListRequest(decode(payload)?),
            other => ClientMessage::Unhandled(other),
        })
    }
}

/// What the reader should do after a frame was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Handle one inbound frame for `session`.
pub(crate) fn dispatch(session: &mut Session, frame: Frame) -> Flow {
    let message = match ClientMessage::decode(&frame) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(
                "Connection {:?}: dropping malformed {:?} payload: {e}",
                session.id(),
                frame.msg_type
            );
            return Flow::Continue;
        }
    };

    match message {
        ClientMessage::Ignore => {}
        ClientMessage::Bye => return Flow::Close,
        ClientMessage::ClientInfo(info) => session.register(info),
        ClientMessage::Unhandled(msg_type) => {
            tracing::debug!("Connection {:?}: ignoring {msg_type:?}", session.id());
        }
        message if !session.is_registered() => {
            tracing::debug!(
                "Connection {:?}: dropping {message:?} from unregistered client",
                session.id()
            );
        }
        ClientMessage::Control(control) => execute_control(session, &control),
        ClientMessage::ItemRequest(request) => {
            session.requests.push(PendingRequest::Item(request.id));
        }
        ClientMessage::ListRequest(request) => {
            session.requests.push(PendingRequest::List(request.id));
        }
    }
    Flow::Continue
}

fn execute_control(session: &Session, control: &Control) {
    let Some(op) = control.op() else {
        tracing::warn!(
            "Connection {:?}: unknown control opcode {}",
            session.id(),
            control.opcode
        );
        return;
    };
    tracing::debug!(
        "Connection {:?}: control {op:?} ({}, {:?})",
        session.id(),
        control.param_i,
        control.param_s
    );
    if let Err(e) = session.adapter.execute_control(control) {
        tracing::warn!("Control {op:?} failed: {e}");
    }
}

/// A request waiting for its turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PendingRequest {
    Item(String),
    List(String),
}

type ReplyFuture = Pin<Box<dyn Future<Output = Bytes> + Send>>;

/// Per-connection request FIFO. Only the head request is answered at a time;
/// the reply frame goes to the requesting connection alone.
pub(crate) struct RequestQueue {
    adapter: Arc<dyn PlayerAdapter>,
    queued: VecDeque<PendingRequest>,
    in_flight: Option<ReplyFuture>,
}

impl RequestQueue {
    pub(crate) fn new(adapter: Arc<dyn PlayerAdapter>) -> Self {
        Self {
            adapter,
            queued: VecDeque::new(),
            in_flight: None,
        }
    }

    pub(crate) fn push(&mut self, request: PendingRequest) {
        self.queued.push_back(request);
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.queued.is_empty() && self.in_flight.is_none()
    }

    /// Wait for the reply frame of the head request.
    ///
    /// Cancel safe: an interrupted wait resumes the same request on the next
    /// call.
    pub(crate) async fn next_reply(&mut self) -> Option<Bytes> {
        if self.in_flight.is_none() {
            let request = self.queued.pop_front()?;
            self.in_flight = Some(self.start(request));
        }
        let reply = self.in_flight.as_mut()?.await;
        self.in_flight = None;
        Some(reply)
    }

    fn start(&self, request: PendingRequest) -> ReplyFuture {
        match request {
            PendingRequest::Item(id) => {
                let reply = self.adapter.answer_item_request(&id);
                Box::pin(async move {
                    let item = reply.resolve().await.unwrap_or_else(|e| {
                        tracing::warn!("Item request {id:?} failed: {e}");
                        Item::none()
                    });
                    let framed = serialize_item(MessageType::ItemRequest, &item);
                    reply_frame(MessageType::ItemRequest, framed, Item::none)
                })
            }
            PendingRequest::List(id) => {
                let reply = self.adapter.answer_list_request(&id);
                Box::pin(async move {
                    let list = reply.resolve().await.unwrap_or_else(|e| {
                        tracing::warn!("List request {id:?} failed: {e}");
                        ItemList::empty(id.as_str())
                    });
                    let framed = serialize_message(MessageType::ListRequest, &list);
                    reply_frame(MessageType::ListRequest, framed, || ItemList::empty(id.as_str()))
                })
            }
        }
    }
}

/// Turn a serialized reply into bytes, answering with `fallback` when the
/// reply could not be framed.
fn reply_frame<T, F>(
    msg_type: MessageType,
    framed: Result<Vec<u8>, MessageError>,
    fallback: F,
) -> Bytes
where
    T: Serializable,
    F: FnOnce() -> T,
{
    match framed {
        Ok(frame) => Bytes::from(frame),
        Err(e) => {
            tracing::warn!("Failed to serialize {msg_type:?} reply: {e}");
            // The fallback values are tiny and always fit in a frame.
            Bytes::from(serialize_message(msg_type, &fallback()).unwrap_or_default())
        }
    }
}
