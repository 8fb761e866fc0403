//! Integration tests for the listener lifecycle over in-memory streams.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use line_bridge::codec;
use line_bridge::{
    BoxError, BridgeError, BridgeHandlers, BridgeOptions, LineBridge, ListenerState,
    ListenerStatus,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

fn quiet() -> BridgeOptions {
    BridgeOptions {
        logging: false,
        ..BridgeOptions::default()
    }
}

/// Wait until `done` returns true, or fail after one second.
async fn wait_for(done: impl Fn() -> bool) {
    for _ in 0..100 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Condition not reached in time");
}

/// One valid line, then end of stream: one message, then one close, with
/// the bridge already stopped inside `on_close`.
#[tokio::test]
async fn listener_delivers_then_closes_in_order() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let status_slot: Arc<OnceLock<ListenerStatus>> = Arc::new(OnceLock::new());

    let on_message_events = Arc::clone(&events);
    let on_close_events = Arc::clone(&events);
    let on_close_status = Arc::clone(&status_slot);
    let handlers = BridgeHandlers::new()
        .on_message(move |message| {
            let events = Arc::clone(&on_message_events);
            async move {
                events.lock().unwrap().push(format!("message:{message}"));
                Ok(())
            }
        })
        .on_close(move || {
            let state = on_close_status.get().map(ListenerStatus::get);
            on_close_events
                .lock()
                .unwrap()
                .push(format!("close:{state:?}"));
        });

    let (local, mut remote) = tokio::io::duplex(1024);
    let (reader, writer) = tokio::io::split(local);
    let bridge = LineBridge::new(reader, writer, handlers, quiet());
    status_slot.set(bridge.status()).unwrap();

    let listener = bridge.start().unwrap();
    remote
        .write_all(format!("{}\n", codec::encode_message("hello")).as_bytes())
        .await
        .unwrap();
    remote.shutdown().await.unwrap();

    listener.join().await;

    assert_eq!(
        *events.lock().unwrap(),
        vec![
            "message: hello ".to_string(),
            "close:Some(Stopped)".to_string(),
        ]
    );
    assert_eq!(bridge.state(), ListenerState::Stopped);
}

/// A failing handler does not stop later lines from being processed.
#[tokio::test]
async fn failing_handler_is_isolated() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&received);
    let error_sink = Arc::clone(&errors);
    let handlers = BridgeHandlers::new()
        .on_message(move |message| {
            let sink = Arc::clone(&sink);
            async move {
                if message.trim() == "bad" {
                    return Err::<(), BoxError>("handler rejected bad".into());
                }
                if message.trim() == "panic" {
                    panic!("handler panicked");
                }
                sink.lock().unwrap().push(message.trim().to_string());
                Ok(())
            }
        })
        .on_error(move |err| error_sink.lock().unwrap().push(err.to_string()));

    let (local, mut remote) = tokio::io::duplex(1024);
    let (reader, writer) = tokio::io::split(local);
    let bridge = LineBridge::new(reader, writer, handlers, quiet());
    let listener = bridge.start().unwrap();

    for message in ["one", "bad", "panic", "two"] {
        remote
            .write_all(format!("{}\n", codec::encode_message(message)).as_bytes())
            .await
            .unwrap();
    }
    remote.shutdown().await.unwrap();
    listener.join().await;

    assert_eq!(*received.lock().unwrap(), vec!["one", "two"]);
    assert_eq!(
        *errors.lock().unwrap(),
        vec![
            "Message handler failed: handler rejected bad".to_string(),
            "Message handler panicked: handler panicked".to_string(),
        ]
    );
}

/// A malformed line is reported and delivered as an empty message.
#[tokio::test]
async fn malformed_line_does_not_stop_listener() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let decode_errors = Arc::new(AtomicUsize::new(0));

    let sink = Arc::clone(&received);
    let counter = Arc::clone(&decode_errors);
    let handlers = BridgeHandlers::new()
        .on_message(move |message| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(message);
                Ok(())
            }
        })
        .on_error(move |err| {
            if matches!(err, BridgeError::Decode(_)) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

    let (local, mut remote) = tokio::io::duplex(1024);
    let (reader, writer) = tokio::io::split(local);
    let bridge = LineBridge::new(reader, writer, handlers, quiet());
    let listener = bridge.start().unwrap();

    remote.write_all(b"5,a,10\n72,105,\n").await.unwrap();
    remote.shutdown().await.unwrap();
    listener.join().await;

    assert_eq!(*received.lock().unwrap(), vec![String::new(), "Hi".to_string()]);
    assert_eq!(decode_errors.load(Ordering::SeqCst), 1);
}

/// A line that is not UTF-8 is a decode failure, not the end of the stream.
#[tokio::test]
async fn invalid_utf8_line_does_not_stop_listener() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&received);
    let error_sink = Arc::clone(&errors);
    let handlers = BridgeHandlers::new()
        .on_message(move |message| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(message);
                Ok(())
            }
        })
        .on_error(move |err| {
            error_sink
                .lock()
                .unwrap()
                .push(matches!(err, BridgeError::Decode(codec::DecodeError::InvalidUtf8(_))));
        });

    let options = BridgeOptions {
        logging: false,
        strip_padding: true,
    };
    let (local, mut remote) = tokio::io::duplex(1024);
    let (reader, writer) = tokio::io::split(local);
    let bridge = LineBridge::new(reader, writer, handlers, options);
    let listener = bridge.start().unwrap();

    remote
        .write_all(format!("{}\n", codec::encode_message("one")).as_bytes())
        .await
        .unwrap();
    remote.write_all(b"72,\xff105\n").await.unwrap();
    remote
        .write_all(format!("{}\n", codec::encode_message("two")).as_bytes())
        .await
        .unwrap();
    remote.shutdown().await.unwrap();
    listener.join().await;

    assert_eq!(
        *received.lock().unwrap(),
        vec!["one".to_string(), String::new(), "two".to_string()]
    );
    assert_eq!(*errors.lock().unwrap(), vec![true]);
}

/// `stop` ends a listener waiting on a silent peer, and `on_close` runs.
#[tokio::test]
async fn stop_cancels_listener_on_silent_stream() {
    let closes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&closes);
    let handlers = BridgeHandlers::new().on_close(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let (local, _remote) = tokio::io::duplex(1024);
    let (reader, writer) = tokio::io::split(local);
    let bridge = LineBridge::new(reader, writer, handlers, quiet());
    let listener = bridge.start().unwrap();

    let status = bridge.status();
    wait_for(|| status.is_running()).await;
    assert_eq!(listener.state(), ListenerState::Running);

    listener.stop();
    tokio::time::timeout(Duration::from_secs(1), listener.join())
        .await
        .expect("Listener did not stop");

    assert_eq!(bridge.state(), ListenerState::Stopped);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

/// An external cancellation token stops the listener too.
#[tokio::test]
async fn external_token_cancels_listener() {
    let cancel = tokio_util::sync::CancellationToken::new();
    let (local, _remote) = tokio::io::duplex(1024);
    let (reader, writer) = tokio::io::split(local);
    let bridge = LineBridge::new(reader, writer, BridgeHandlers::new(), quiet());

    let listener = bridge.start_with_cancellation(cancel.clone()).unwrap();
    cancel.cancel();
    listener.join().await;

    assert_eq!(bridge.state(), ListenerState::Stopped);
}

/// `send("hi")` writes exactly one line equal to the encoding of " hi ".
#[tokio::test]
async fn send_writes_one_framed_line() {
    let (local, remote) = tokio::io::duplex(1024);
    let (reader, writer) = tokio::io::split(local);
    let bridge = LineBridge::new(reader, writer, BridgeHandlers::new(), quiet());

    bridge.send("hi").await.unwrap();
    bridge.close().await.unwrap();

    let mut lines = BufReader::new(remote).lines();
    assert_eq!(
        lines.next_line().await.unwrap(),
        Some(codec::encode(" hi "))
    );
    assert_eq!(lines.next_line().await.unwrap(), None);
}

/// A handler can reply through a sender clone while the listener runs.
#[tokio::test]
async fn handler_replies_through_sender() {
    let (local, remote) = tokio::io::duplex(1024);
    let (reader, writer) = tokio::io::split(local);
    let sender = line_bridge::MessageSender::new(writer, false);

    let reply = sender.clone();
    let handlers = BridgeHandlers::new().on_message(move |message| {
        let reply = reply.clone();
        async move {
            reply.send(&format!("Echo: {}", message.trim())).await?;
            Ok::<(), BoxError>(())
        }
    });
    let bridge = LineBridge::with_sender(reader, sender, handlers, quiet());
    let listener = bridge.start().unwrap();

    let (remote_read, mut remote_write) = tokio::io::split(remote);
    remote_write
        .write_all(format!("{}\n", codec::encode_message("ping")).as_bytes())
        .await
        .unwrap();

    let mut lines = BufReader::new(remote_read).lines();
    let reply_line = lines.next_line().await.unwrap().unwrap();
    assert_eq!(codec::decode(&reply_line).unwrap(), " Echo: ping ");

    listener.stop();
    listener.join().await;
}
