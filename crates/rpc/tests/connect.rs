//! Handshake and lifecycle of connections.

mod helpers;

use std::time::Duration;

use helpers::{ScriptedTransport, connect_pair, fixed_id, init_tracing, settle, wait_until};
use pretty_assertions::assert_eq;
use serde_json::json;
use tether_proto::{CallId, Message, MethodPath};
use tether_rpc::{ConnectOptions, ConnectionState, Error, ErrorCode, Methods, connect};
use tether_transport::port_transport_pair;

fn multiply() -> Methods {
	Methods::new().method_sync("multiply", |args| Ok(args.arg::<i64>(0)? * args.arg::<i64>(1)?))
}

fn sorted_paths(paths: Option<&[MethodPath]>) -> Vec<String> {
	let mut paths: Vec<String> = paths.expect("paths advertised").iter().map(ToString::to_string).collect();
	paths.sort();
	paths
}

#[tokio::test]
async fn empty_side_calls_multiply() {
	init_tracing();
	let (a, b) = connect_pair(multiply(), Methods::new());

	let remote = settle(b.remote()).await.unwrap();
	let product = settle(remote.call("multiply", vec![json!(2), json!(5)]).unwrap()).await;
	assert_eq!(product, Ok(json!(10)));
	assert_eq!(a.state(), ConnectionState::Established);
	assert_eq!(b.state(), ConnectionState::Established);
}

#[tokio::test]
async fn each_side_sees_the_other_sides_paths() {
	for (a_id, b_id) in [("a", "b"), ("b", "a")] {
		let (left, right) = port_transport_pair();
		let math = Methods::new().method_sync("add", |args| Ok(args.arg::<i64>(0)? + args.arg::<i64>(1)?));
		let a_methods = multiply().nest("math", math);
		let b_methods = Methods::new().method_sync("ping", |_| Ok("pong"));
		let a = connect(ConnectOptions::new(left).methods(a_methods).id_generator(fixed_id(a_id))).unwrap();
		let b = connect(ConnectOptions::new(right).methods(b_methods).id_generator(fixed_id(b_id))).unwrap();

		let a_remote = settle(a.remote()).await.unwrap();
		let b_remote = settle(b.remote()).await.unwrap();
		assert_eq!(sorted_paths(a_remote.paths()), ["ping"]);
		assert_eq!(sorted_paths(b_remote.paths()), ["math.add", "multiply"]);

		let sum = b_remote.method("math.add").expect("advertised").call(vec![json!(1), json!(2)]).unwrap();
		assert_eq!(settle(sum).await, Ok(json!(3)));
		let pong = a_remote.method("ping").expect("advertised").call(Vec::new()).unwrap();
		assert_eq!(settle(pong).await, Ok(json!("pong")));
	}
}

#[tokio::test]
async fn remote_may_be_awaited_repeatedly() {
	let (a, _b) = connect_pair(Methods::new(), Methods::new());
	let first = settle(a.remote()).await.unwrap();
	let second = settle(a.remote()).await.unwrap();
	assert_eq!(first.paths(), second.paths());
}

#[tokio::test]
async fn zero_timeout_without_remote_times_out() {
	let (left, _never_initialized) = port_transport_pair();
	let a = connect(ConnectOptions::new(left).timeout(Duration::ZERO)).unwrap();

	let err = settle(a.remote()).await.unwrap_err();
	assert_eq!(err.code(), Some(ErrorCode::ConnectionTimeout));
	assert_eq!(err.to_string(), "Connection timed out after 0ms");
	assert_eq!(a.state(), ConnectionState::Destroyed);
}

#[tokio::test(start_paused = true)]
async fn timeout_does_not_fire_after_completion() {
	let (left, right) = port_transport_pair();
	let a = connect(ConnectOptions::new(left).timeout(Duration::from_millis(50))).unwrap();
	let _b = connect(ConnectOptions::new(right)).unwrap();

	settle(a.remote()).await.unwrap();
	tokio::time::sleep(Duration::from_millis(100)).await;
	assert_eq!(a.state(), ConnectionState::Established);
}

#[tokio::test]
async fn transport_reuse_is_rejected() {
	let transport = ScriptedTransport::new();
	let _first = connect(ConnectOptions::new(transport.clone())).unwrap();
	let second = connect(ConnectOptions::new(transport.clone()));
	assert_eq!(
		second.unwrap_err(),
		Error::InvalidArgument("A transport can only be used for a single connection".into())
	);
}

#[tokio::test]
async fn handshake_send_failure_is_transmission_failed() {
	let transport = ScriptedTransport::new();
	transport.fail_sends(true);
	let connection = connect(ConnectOptions::new(transport.clone())).unwrap();

	let err = settle(connection.remote()).await.unwrap_err();
	assert_eq!(err.code(), Some(ErrorCode::TransmissionFailed));
	assert!(transport.is_destroyed());
}

#[tokio::test]
async fn destroy_while_pending_rejects_completion() {
	let transport = ScriptedTransport::new();
	let connection = connect(ConnectOptions::new(transport.clone())).unwrap();
	assert_eq!(connection.state(), ConnectionState::Pending);

	connection.destroy();
	connection.destroy();
	assert_eq!(settle(connection.remote()).await.unwrap_err(), Error::ConnectionDestroyed("Connection destroyed".into()));
	assert_eq!(connection.state(), ConnectionState::Destroyed);

	let destroys = transport.sent().iter().filter(|m| matches!(m, Message::Destroy)).count();
	assert_eq!(destroys, 1);
	assert!(transport.is_destroyed());
	assert_eq!(transport.handler_count(), 0);
}

#[tokio::test]
async fn destroy_after_completion_keeps_the_resolved_proxy() {
	let (a, _b) = connect_pair(Methods::new(), multiply());
	let remote = settle(a.remote()).await.unwrap();

	a.destroy();
	let again = settle(a.remote()).await.unwrap();
	assert!(again.is_disposed());
	let err = remote.call("multiply", vec![json!(1), json!(1)]).unwrap_err();
	assert_eq!(err.to_string(), "Method call multiply() failed due to destroyed connection");
}

#[tokio::test]
async fn remote_destroy_tears_down_without_echo() {
	let (a, b) = connect_pair(Methods::new(), Methods::new());
	settle(a.remote()).await.unwrap();
	settle(b.remote()).await.unwrap();

	a.destroy();
	wait_until(|| b.state() == ConnectionState::Destroyed).await;

	let transport = ScriptedTransport::new();
	let connection = connect(ConnectOptions::new(transport.clone())).unwrap();
	transport.take_sent();
	transport.deliver(Message::Destroy);
	assert_eq!(connection.state(), ConnectionState::Destroyed);
	assert_eq!(transport.take_sent(), Vec::new());
}

#[tokio::test]
async fn duplicate_syn_after_completion_binds_once() {
	let transport = ScriptedTransport::new();
	let methods = Methods::new().method_sync("ping", |_| Ok("pong"));
	let connection = connect(ConnectOptions::new(transport.clone()).methods(methods).id_generator(fixed_id("b"))).unwrap();

	transport.syn("a");
	transport.deliver(Message::Ack2 { method_paths: None });
	let remote = settle(connection.remote()).await.unwrap();
	assert_eq!(remote.paths(), None);

	transport.syn("a");
	transport.deliver(Message::Ack2 {
		method_paths: Some(vec![MethodPath::from("stray")]),
	});
	assert!(!remote.is_disposed());

	transport.take_sent();
	transport.deliver(Message::Call {
		id: CallId::from(7),
		method_path: MethodPath::from("ping"),
		args: Vec::new(),
	});
	wait_until(|| transport.replies() >= 1).await;
	tokio::task::yield_now().await;
	assert_eq!(transport.take_sent(), vec![Message::reply_value(CallId::from(7), json!("pong"))]);

	let same = settle(connection.remote()).await.unwrap();
	assert_eq!(same.paths(), None);
}

#[tokio::test]
async fn remote_restart_rebinds_the_proxy() {
	let transport = ScriptedTransport::new();
	let methods = Methods::new().method_sync("ping", |_| Ok("pong"));
	let connection = connect(ConnectOptions::new(transport.clone()).methods(methods).id_generator(fixed_id("b"))).unwrap();

	transport.syn("a");
	transport.deliver(Message::Ack2 {
		method_paths: Some(vec![MethodPath::from("old")]),
	});
	let before = settle(connection.remote()).await.unwrap();
	let pending = before.call("old", Vec::new()).unwrap();

	transport.syn("c");
	transport.deliver(Message::Ack1 {
		method_paths: vec![MethodPath::from("new")],
	});
	assert_eq!(connection.state(), ConnectionState::Established);
	assert_eq!(settle(pending).await.unwrap_err().code(), Some(ErrorCode::ConnectionDestroyed));
	assert!(before.is_disposed());

	let after = settle(connection.remote()).await.unwrap();
	assert_eq!(after.paths(), Some(&[MethodPath::from("new")][..]));
	assert!(after.method("new").is_some());

	transport.take_sent();
	let call = after.call("new", vec![json!(1)]).unwrap();
	let sent = transport.take_sent();
	let [Message::Call { id, .. }] = sent.as_slice() else {
		panic!("expected one call, got {sent:?}");
	};
	transport.deliver(Message::reply_value(id.clone(), json!("ok")));
	assert_eq!(settle(call).await, Ok(json!("ok")));

	transport.deliver(Message::Call {
		id: CallId::from(1),
		method_path: MethodPath::from("ping"),
		args: Vec::new(),
	});
	wait_until(|| transport.replies() >= 1).await;
}

#[tokio::test]
async fn dropping_the_last_handle_destroys_the_connection() {
	let (a, b) = connect_pair(multiply(), Methods::new());
	let a_remote = settle(a.remote()).await.unwrap();
	let b_remote = settle(b.remote()).await.unwrap();

	let kept = a.clone();
	drop(a);
	assert_eq!(kept.state(), ConnectionState::Established);
	let product = settle(b_remote.call("multiply", vec![json!(2), json!(5)]).unwrap()).await;
	assert_eq!(product, Ok(json!(10)));

	drop(kept);
	assert!(a_remote.is_disposed());
	wait_until(|| b.state() == ConnectionState::Destroyed).await;
	assert!(matches!(
		b_remote.call("multiply", vec![json!(2), json!(5)]),
		Err(Error::ConnectionDestroyed(_))
	));
}

#[tokio::test]
async fn dropping_a_pending_connection_notifies_the_remote() {
	let transport = ScriptedTransport::new();
	let connection = connect(ConnectOptions::new(transport.clone())).unwrap();
	transport.take_sent();

	drop(connection);
	assert_eq!(transport.take_sent(), vec![Message::Destroy]);
	assert!(transport.is_destroyed());
	assert_eq!(transport.handler_count(), 0);
}
