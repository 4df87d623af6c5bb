//! Unit tests for the sync hub.

use super::*;
use crate::test_support::{MockAdapter, drain_frames};
use playlink_wire::{Item, MAX_FRAME_SIZE, PlayerState, decode};

fn hub_with(adapter: Arc<MockAdapter>) -> (SyncHub, SyncHandle) {
    let (handle, events) = SyncHandle::channel();
    (SyncHub::new(adapter, events), handle)
}

/// Apply every queued event. Returns how many there were.
fn pump(hub: &mut SyncHub) -> usize {
    let mut processed = 0;
    while let Ok(event) = hub.rx.try_recv() {
        hub.handle_event(event);
        processed += 1;
    }
    processed
}

fn client(id: u64) -> (ConnectionHandle, mpsc::Receiver<Bytes>) {
    ConnectionHandle::new(ConnectionId(id))
}

fn types(frames: &[playlink_wire::Frame]) -> Vec<MessageType> {
    frames.iter().map(|f| f.msg_type).collect()
}

#[test]
fn test_burst_of_notifications_coalesces_into_one_recompute() {
    let adapter = Arc::new(MockAdapter::default());
    let (mut hub, sync) = hub_with(Arc::clone(&adapter));

    for _ in 0..100 {
        sync.notify_state_changed();
    }
    assert_eq!(pump(&mut hub), 1);
    assert_eq!(adapter.state_queries(), 1);

    // The flag is cleared again, so the next change is not lost.
    sync.notify_state_changed();
    assert_eq!(pump(&mut hub), 1);
    assert_eq!(adapter.state_queries(), 2);
}

#[test]
fn test_categories_are_scheduled_independently() {
    let adapter = Arc::new(MockAdapter::default());
    let (mut hub, sync) = hub_with(adapter);

    sync.notify_state_changed();
    sync.notify_item_changed();
    sync.notify_playlist_changed();
    sync.notify_queue_changed();
    sync.notify_item_changed();
    assert_eq!(pump(&mut hub), 4);
}

#[test]
fn test_unchanged_state_is_never_pushed_twice() {
    let adapter = Arc::new(MockAdapter::default());
    let (mut hub, sync) = hub_with(Arc::clone(&adapter));
    sync.notify_state_changed();
    pump(&mut hub);

    let (handle, mut rx) = client(1);
    sync.register(handle, ClientInfo::default());
    pump(&mut hub);
    drain_frames(&mut rx);

    for _ in 0..20 {
        sync.notify_state_changed();
        pump(&mut hub);
    }
    assert!(drain_frames(&mut rx).is_empty());

    adapter.set_volume(55);
    sync.notify_state_changed();
    pump(&mut hub);
    let frames = drain_frames(&mut rx);
    assert_eq!(types(&frames), vec![MessageType::State]);
    let state: PlayerState = decode(&frames[0].payload).unwrap();
    assert_eq!(state.volume, 55);
}

#[test]
fn test_registration_gets_current_state_not_history() {
    let adapter = Arc::new(MockAdapter::default());
    let (mut hub, sync) = hub_with(Arc::clone(&adapter));

    for volume in [10, 20, 30] {
        adapter.set_volume(volume);
        sync.notify_state_changed();
        pump(&mut hub);
    }

    let (handle, mut rx) = client(7);
    sync.register(handle, ClientInfo::default());
    pump(&mut hub);

    let frames = drain_frames(&mut rx);
    // Queue is unsupported by the mock, so it is skipped.
    assert_eq!(
        types(&frames),
        vec![
            MessageType::PlayerInfo,
            MessageType::State,
            MessageType::Item,
            MessageType::Playlist,
        ]
    );
    let state: PlayerState = decode(&frames[1].payload).unwrap();
    assert_eq!(state.volume, 30);
}

#[test]
fn test_registration_bypasses_gate_without_touching_snapshots() {
    let adapter = Arc::new(MockAdapter::default());
    let (mut hub, sync) = hub_with(Arc::clone(&adapter));

    let (first, mut first_rx) = client(1);
    sync.register(first, ClientInfo::default());
    pump(&mut hub);
    drain_frames(&mut first_rx);

    adapter.set_volume(80);
    sync.notify_state_changed();
    pump(&mut hub);
    assert_eq!(types(&drain_frames(&mut first_rx)), vec![MessageType::State]);

    // A late joiner still receives the value the hub already pushed.
    let (second, mut second_rx) = client(2);
    sync.register(second, ClientInfo::default());
    pump(&mut hub);
    assert!(types(&drain_frames(&mut second_rx)).contains(&MessageType::State));
    assert!(drain_frames(&mut first_rx).is_empty());
}

#[test]
fn test_item_with_oversized_thumbnail_is_pushed_without_it() {
    let adapter = Arc::new(MockAdapter::default());
    let (mut hub, sync) = hub_with(Arc::clone(&adapter));

    let (first, mut first_rx) = client(1);
    sync.register(first, ClientInfo::default());
    pump(&mut hub);
    drain_frames(&mut first_rx);

    *adapter.item.lock().unwrap() = Item {
        id: "track/9".into(),
        info: vec![("title".into(), "Last Train Home".into())],
        image: vec![0; MAX_FRAME_SIZE - 20],
        ..Item::none()
    };
    sync.notify_item_changed();
    pump(&mut hub);

    let frames = drain_frames(&mut first_rx);
    assert_eq!(types(&frames), vec![MessageType::Item]);
    let pushed: Item = decode(&frames[0].payload).unwrap();
    assert_eq!(pushed.id, "track/9");
    assert_eq!(pushed.meta("title"), Some("Last Train Home"));
    assert!(pushed.image.is_empty());

    // A late joiner's full sync includes the item too.
    let (second, mut second_rx) = client(2);
    sync.register(second, ClientInfo::default());
    pump(&mut hub);
    let frames = drain_frames(&mut second_rx);
    assert_eq!(
        types(&frames),
        vec![
            MessageType::PlayerInfo,
            MessageType::State,
            MessageType::Item,
            MessageType::Playlist,
        ]
    );
    let synced: Item = decode(&frames[2].payload).unwrap();
    assert_eq!(synced.id, "track/9");
}

#[test]
fn test_only_registered_clients_receive_pushes() {
    let adapter = Arc::new(MockAdapter::default());
    let (mut hub, sync) = hub_with(Arc::clone(&adapter));

    let (registered, mut registered_rx) = client(1);
    let (_bystander, mut bystander_rx) = client(2);
    sync.register(registered, ClientInfo::default());
    pump(&mut hub);
    drain_frames(&mut registered_rx);

    adapter.set_volume(3);
    sync.notify_state_changed();
    pump(&mut hub);
    assert_eq!(drain_frames(&mut registered_rx).len(), 1);
    assert!(drain_frames(&mut bystander_rx).is_empty());
}

#[test]
fn test_duplicate_registration_is_ignored() {
    let adapter = Arc::new(MockAdapter::default());
    let (mut hub, sync) = hub_with(adapter);

    let (handle, mut rx) = client(4);
    sync.register(handle.clone(), ClientInfo::default());
    sync.register(handle, ClientInfo::default());
    pump(&mut hub);

    let player_infos = drain_frames(&mut rx)
        .iter()
        .filter(|f| f.msg_type == MessageType::PlayerInfo)
        .count();
    assert_eq!(player_infos, 1);
    assert_eq!(hub.clients.len(), 1);
}

#[test]
fn test_unregistered_client_no_longer_receives() {
    let adapter = Arc::new(MockAdapter::default());
    let (mut hub, sync) = hub_with(Arc::clone(&adapter));

    let (handle, mut rx) = client(9);
    sync.register(handle, ClientInfo::default());
    pump(&mut hub);
    drain_frames(&mut rx);

    sync.unregister(ConnectionId(9));
    // Removing twice is harmless.
    sync.unregister(ConnectionId(9));
    adapter.set_volume(1);
    sync.notify_state_changed();
    pump(&mut hub);

    assert!(hub.clients.is_empty());
    assert!(drain_frames(&mut rx).is_empty());
}

#[test]
fn test_push_to_closed_connection_is_silent() {
    let adapter = Arc::new(MockAdapter::default());
    let (mut hub, sync) = hub_with(Arc::clone(&adapter));

    let (handle, rx) = client(1);
    sync.register(handle, ClientInfo::default());
    pump(&mut hub);
    drop(rx);

    adapter.set_volume(12);
    sync.notify_state_changed();
    assert_eq!(pump(&mut hub), 1);
}

#[tokio::test]
async fn test_shutdown_says_bye_and_stops_hub() {
    let adapter = Arc::new(MockAdapter::default());
    let (hub, sync) = hub_with(adapter);
    let task = tokio::spawn(hub.run());

    let (handle, mut rx) = client(3);
    sync.register(handle, ClientInfo::default());
    assert_eq!(sync.client_count().await, 1);

    sync.shutdown().await;
    task.await.unwrap();

    let frames = drain_frames(&mut rx);
    let last = frames.last().unwrap();
    assert_eq!(last.msg_type, MessageType::Bye);
    assert!(last.payload.is_empty());

    assert_eq!(sync.client_count().await, 0);
    // Notifications after shutdown go nowhere.
    sync.notify_state_changed();
}
