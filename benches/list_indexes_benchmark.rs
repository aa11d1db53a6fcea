// listIndexes benchmarks: the handler alone and a full wire round trip
use bson::doc;
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use idxlist::auth::AuthorizationSession;
use idxlist::catalog::MemoryCatalog;
use idxlist::commands::list_indexes;
use idxlist::config::Config;
use idxlist::cursor::CursorManager;
use idxlist::find_common::ReplyBudget;
use idxlist::namespace::NamespaceString;
use idxlist::operation::OperationContext;
use idxlist::protocol::{HEADER_LEN, MessageHeader, decode_op_msg, encode_op_msg};
use idxlist::server::spawn_with_shutdown;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const BUDGET: usize = 16 * 1024 * 1024;

fn catalog_with(index_count: usize) -> MemoryCatalog {
    let catalog = MemoryCatalog::new();
    let ns = NamespaceString::new("bench", "coll");
    for i in 0..index_count {
        let spec = doc! { "v": 2i32, "key": { format!("f{}", i): 1i32 }, "name": format!("f{}_1", i) };
        catalog.create_index(&ns, spec).unwrap();
    }
    catalog
}

fn bench_handler(c: &mut Criterion) {
    let mut group = c.benchmark_group("list_indexes_handler");
    for &index_count in &[10usize, 64, 500] {
        let catalog = catalog_with(index_count);
        let cursors = CursorManager::new();
        let authz = AuthorizationSession::unrestricted();
        let cmd = doc! { "listIndexes": "coll" };
        group.bench_with_input(BenchmarkId::new("indexes", index_count), &index_count, |b, _| {
            b.iter(|| {
                let op_ctx = OperationContext::new(&authz);
                let reply = list_indexes::run(&op_ctx, &catalog, &cursors, ReplyBudget::new(BUDGET), "bench", &cmd).unwrap();
                black_box(reply);
            });
        });
    }
    group.finish();
}

async fn round_trip(stream: &mut TcpStream, cmd: &bson::Document, request_id: i32) -> bson::Document {
    stream.write_all(&encode_op_msg(cmd, 0, request_id).unwrap()).await.unwrap();
    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header).await.unwrap();
    let hdr = MessageHeader::parse(&header);
    let mut body = vec![0u8; hdr.body_len().unwrap()];
    stream.read_exact(&mut body).await.unwrap();
    decode_op_msg(&body).unwrap().1
}

fn bench_wire_paging(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut cfg = Config::default();
    cfg.listen_addr = "127.0.0.1:0".into();
    let (state, addr, shutdown, _handle) = rt.block_on(spawn_with_shutdown(cfg)).unwrap();
    let ns = NamespaceString::new("bench", "coll");
    for i in 0..500 {
        let spec = doc! { "v": 2i32, "key": { format!("f{}", i): 1i32 }, "name": format!("f{}_1", i) };
        state.catalog.create_index(&ns, spec).unwrap();
    }

    let mut group = c.benchmark_group("list_indexes_wire");
    group.measurement_time(Duration::from_secs(10));
    for &batch_size in &[50i32, 500] {
        group.bench_with_input(BenchmarkId::new("batch_size", batch_size), &batch_size, |b, &batch_size| {
            b.to_async(&rt).iter(|| async move {
                let mut stream = TcpStream::connect(addr).await.unwrap();
                let cmd = doc! { "listIndexes": "coll", "cursor": { "batchSize": batch_size }, "$db": "bench" };
                let mut reply = round_trip(&mut stream, &cmd, 1).await;
                let mut request_id = 2;
                loop {
                    let id = reply.get_document("cursor").unwrap().get_i64("id").unwrap();
                    if id == 0 {
                        break;
                    }
                    let gm = doc! { "getMore": id, "collection": "$cmd.listIndexes.coll", "$db": "bench" };
                    reply = round_trip(&mut stream, &gm, request_id).await;
                    request_id += 1;
                }
                black_box(reply);
            });
        });
    }
    group.finish();
    let _ = shutdown.send(true);
}

criterion_group!(benches, bench_handler, bench_wire_paging);
criterion_main!(benches);
