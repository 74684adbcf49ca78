use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tether_proto::{CallId, Message, MessageEnvelope, MethodPath, ParticipantId};
use tether_transport::{
	Endpoint, InitializeOptions, MessageChannel, Transport, TransportError, WorkerTransport, port_transport_pair,
};
use tokio::sync::mpsc;

const ORIGIN: &str = "https://app.test";

fn subscribe(transport: &impl Transport) -> mpsc::UnboundedReceiver<(Message, usize)> {
	let (tx, rx) = mpsc::unbounded_channel();
	transport.add_message_handler(Arc::new(move |received| {
		let _ = tx.send((received.envelope.message.clone(), received.transfer.len()));
	}));
	rx
}

fn initialize(transport: &impl Transport, channel: Option<&'static str>) {
	transport
		.initialize(InitializeOptions::new(move |envelope| envelope.is_for(channel)))
		.unwrap();
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<(Message, usize)>) -> (Message, usize) {
	tokio::time::timeout(Duration::from_secs(1), rx.recv())
		.await
		.expect("message should arrive")
		.expect("handler channel open")
}

fn call(id: u64, channel: Option<&str>) -> MessageEnvelope {
	MessageEnvelope::new(
		channel.map(str::to_owned),
		Message::Call {
			id: CallId::from(id),
			method_path: MethodPath::from("echo"),
			args: vec![json!(id)],
		},
	)
}

#[tokio::test]
async fn worker_transport_moves_calls_to_side_channel() {
	let host_scope = Endpoint::new(ORIGIN);
	let worker_scope = Endpoint::new(ORIGIN);
	let host = WorkerTransport::new(host_scope.clone(), worker_scope.clone());
	let worker = WorkerTransport::new(worker_scope, host_scope);
	initialize(&host, None);
	initialize(&worker, None);
	let mut host_rx = subscribe(&host);
	let mut worker_rx = subscribe(&worker);

	let syn = MessageEnvelope::new(
		None,
		Message::Syn {
			participant_id: ParticipantId::new("w"),
		},
	);
	worker.send_message(syn, Vec::new()).unwrap();
	assert!(matches!(recv(&mut host_rx).await.0, Message::Syn { .. }));

	host.send_message(MessageEnvelope::new(None, Message::Ack2 { method_paths: None }), Vec::new())
		.unwrap();
	let (ack2, transferred) = recv(&mut worker_rx).await;
	assert!(matches!(ack2, Message::Ack2 { .. }));
	assert_eq!(transferred, 0, "the side-channel port is consumed by the transport");

	for id in 0..3 {
		worker.send_message(call(id, None), Vec::new()).unwrap();
	}
	for id in 0..3 {
		match recv(&mut host_rx).await.0 {
			Message::Call { id: got, .. } => assert_eq!(got, CallId::from(id)),
			other => panic!("expected call, got {other:?}"),
		}
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn side_channel_opened_during_dispatch_waits_for_the_handler() {
	let host_scope = Endpoint::new(ORIGIN);
	let worker_scope = Endpoint::new(ORIGIN);
	let host = WorkerTransport::new(host_scope.clone(), worker_scope.clone());
	let worker = Arc::new(WorkerTransport::new(worker_scope, host_scope));
	initialize(&host, None);
	initialize(&worker, None);
	let mut host_rx = subscribe(&host);

	// Answers ACK1 with ACK2 and only then subscribes to calls, as a completing follower does.
	let (calls_tx, mut calls_rx) = mpsc::unbounded_channel();
	let follower = Arc::downgrade(&worker);
	worker.add_message_handler(Arc::new(move |received| {
		let Some(follower) = follower.upgrade() else {
			return;
		};
		if !matches!(received.envelope.message, Message::Ack1 { .. }) {
			return;
		}
		follower
			.send_message(MessageEnvelope::new(None, Message::Ack2 { method_paths: None }), Vec::new())
			.unwrap();
		std::thread::sleep(Duration::from_millis(100));
		let calls_tx = calls_tx.clone();
		follower.add_message_handler(Arc::new(move |received| {
			if let Message::Call { id, .. } = &received.envelope.message {
				let _ = calls_tx.send(id.clone());
			}
		}));
	}));

	host.send_message(MessageEnvelope::new(None, Message::Ack1 { method_paths: Vec::new() }), Vec::new())
		.unwrap();
	assert!(matches!(recv(&mut host_rx).await.0, Message::Ack2 { .. }));
	host.send_message(call(1, None), Vec::new()).unwrap();

	let delivered = tokio::time::timeout(Duration::from_secs(1), calls_rx.recv()).await;
	assert_eq!(delivered, Ok(Some(CallId::from(1))));
}

#[tokio::test]
async fn port_pair_delivers_in_order() {
	let (a, b) = port_transport_pair();
	initialize(&a, None);
	initialize(&b, None);
	let mut b_rx = subscribe(&b);

	for id in 0..5 {
		a.send_message(call(id, None), Vec::new()).unwrap();
	}
	for id in 0..5 {
		match recv(&mut b_rx).await.0 {
			Message::Call { id: got, .. } => assert_eq!(got, CallId::from(id)),
			other => panic!("expected call, got {other:?}"),
		}
	}
}

#[tokio::test]
async fn port_transport_filters_by_channel() {
	let (a, b) = port_transport_pair();
	initialize(&a, None);
	initialize(&b, Some("left"));
	let mut b_rx = subscribe(&b);

	a.send_message(call(1, Some("right")), Vec::new()).unwrap();
	a.send_message(call(2, Some("left")), Vec::new()).unwrap();
	match recv(&mut b_rx).await.0 {
		Message::Call { id, .. } => assert_eq!(id, CallId::from(2)),
		other => panic!("expected call, got {other:?}"),
	}
}

#[tokio::test]
async fn port_transport_transfers_ports() {
	let (a, b) = port_transport_pair();
	initialize(&a, None);
	initialize(&b, None);
	let mut b_rx = subscribe(&b);

	let (kept, sent) = MessageChannel::new();
	a.send_message(call(1, None), vec![sent]).unwrap();
	assert_eq!(recv(&mut b_rx).await.1, 1);

	kept.close();
	let (_other, closed) = MessageChannel::new();
	closed.close();
	let result = a.send_message(call(2, None), vec![closed]);
	assert!(matches!(result, Err(TransportError::DataClone(_))));
}

#[tokio::test]
async fn handlers_can_be_removed() {
	let (a, b) = port_transport_pair();
	initialize(&a, None);
	initialize(&b, None);
	let (tx, mut rx) = mpsc::unbounded_channel();
	let id = b.add_message_handler(Arc::new(move |_| {
		let _ = tx.send(());
	}));
	let mut kept = subscribe(&b);

	b.remove_message_handler(id);
	a.send_message(call(1, None), Vec::new()).unwrap();
	recv(&mut kept).await;
	assert!(rx.recv().await.is_none(), "removed handler was dropped");
}

#[tokio::test]
async fn destroyed_port_transport_rejects_sends() {
	let (a, b) = port_transport_pair();
	initialize(&a, None);
	initialize(&b, None);

	a.destroy();
	a.destroy();
	assert_eq!(a.send_message(call(1, None), Vec::new()), Err(TransportError::Destroyed));
	assert_eq!(
		a.initialize(InitializeOptions::new(|_| true)),
		Err(TransportError::Destroyed)
	);
	assert!(matches!(b.send_message(call(2, None), Vec::new()), Ok(()) | Err(TransportError::Closed)));
}
