use std::sync::Arc;

use realm_core::core::{FieldType, FieldValue, Header, Message, Schema};
use realm_core::module::{Hooks, Module};
use realm_core::transport::{ConnEventKind, TcpServer};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time::{sleep, Duration, Instant};

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_encode_decode_shared_schema() {
    let schema = Arc::new(
        Schema::define(
            1,
            &[(FieldType::UInt32, 1), (FieldType::MemoryBlock, 1)],
        )
        .unwrap(),
    );
    let block_sizes = [0usize, 64, 512, 4096, 60_000];

    let mut tasks = JoinSet::new();
    for &size in &block_sizes {
        let schema = schema.clone();
        tasks.spawn(async move {
            let mut buf = vec![0u8; size + 64];
            for i in 0..2_000u32 {
                let block = vec![(i as usize + size) as u8; size];
                let len = Message::new(&schema)
                    .with(0, i)
                    .with(1, FieldValue::block(&block))
                    .encode_top_level(&mut buf, Header::new(1))
                    .unwrap();
                let decoded = schema.decode_top_level(&buf[..len]).unwrap();
                assert_eq!(decoded.get::<u32>(0), Some(i));
                assert_eq!(decoded.block(1), Some(block.as_slice()));
            }
        });
    }

    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_record_access_after_seal() {
    const KIND: u32 = 0;
    let owner = Module::create::<()>("character", Hooks::new()).unwrap();
    owner.set_record_layout(KIND, || 0u32, |_| {}).unwrap();
    let key = owner.attach_default::<u64>(KIND, "stats").unwrap();
    let owner = Arc::new(owner);

    let mut tasks = JoinSet::new();
    for t in 0..8u64 {
        let owner = owner.clone();
        tasks.spawn(async move {
            for i in 0..500u64 {
                let mut record = owner.create_record(KIND).unwrap();
                *record.get_attached_data_mut(key).unwrap() = t * 1000 + i;
                assert_eq!(record.get_attached_data(key), Some(&(t * 1000 + i)));
                owner.destroy_record(record).unwrap();
            }
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_clients_each_receive_in_order() {
    let clients = 8usize;
    let server = TcpServer::create("127.0.0.1", 0, clients as u32).unwrap();
    server.spawn_tasks(&tokio::runtime::Handle::current()).unwrap();
    let addr = server.local_addr();

    let mut tasks = JoinSet::new();
    for c in 0..clients {
        tasks.spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            for i in 0..100u8 {
                stream.write_all(&[c as u8, i]).await.unwrap();
            }
            // Keep the connection open until the server has read everything.
            sleep(Duration::from_millis(500)).await;
        });
    }

    let mut per_client: std::collections::HashMap<_, Vec<u8>> = Default::default();
    let deadline = Instant::now() + Duration::from_secs(5);
    while per_client.values().map(Vec::len).sum::<usize>() < clients * 200 {
        assert!(Instant::now() < deadline, "timed out");
        for event in server.poll_recv() {
            per_client.entry(event.id).or_default().extend_from_slice(&event.data);
            server.free_recv(event);
        }
        sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(per_client.len(), clients);
    for data in per_client.values() {
        let owner = data[0];
        let expected: Vec<u8> = (0..100u8).flat_map(|i| [owner, i]).collect();
        assert_eq!(data, &expected);
    }

    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }
    let mut events = Vec::new();
    server.poll_conn(&mut events, 64);
    assert_eq!(
        events
            .iter()
            .filter(|e| e.kind == ConnEventKind::Connected)
            .count(),
        clients
    );
}
