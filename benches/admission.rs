use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ranged_gate::record::{Record, RecordFile};
use ranged_gate::{Coordinator, Outcome, RecordRange, RegionConfig, Request};
use tempfile::{tempdir, TempDir};

/// 测试参数
const RECORDS: u64 = 1024;
const NUM_WORKERS: usize = 8; // 8个并发线程
const ROUNDS: usize = 256; // 每个worker的获取/释放次数
const READ_SPAN: u64 = 64;

/// 创建协调区域和记录文件
fn setup() -> (TempDir, Coordinator, RecordFile) {
    let dir = tempdir().unwrap();
    let records: Vec<_> = (1..=RECORDS as i32)
        .map(|id| Record::new(id, "Bench", "Worker", 0))
        .collect();
    let file = RecordFile::create(dir.path().join("accounts.bin"), &records).unwrap();
    let coordinator =
        Coordinator::create(dir.path().join("bench.region"), RegionConfig::default()).unwrap();
    (dir, coordinator, file)
}

/// 单线程，无冲突
fn bench_uncontended(coordinator: &Coordinator, file: &RecordFile) {
    for round in 0..ROUNDS {
        let index = round as u64 % RECORDS;
        let lease = coordinator.acquire(Request::update(index, 1)).unwrap();
        let update = file.update_balance(&lease, index, 1).unwrap();
        lease.release(update.into()).unwrap();
    }
}

/// 多线程，每个worker写自己的记录（互不冲突）
fn bench_disjoint_threads(coordinator: &Coordinator, file: &RecordFile) {
    std::thread::scope(|s| {
        for worker_id in 0..NUM_WORKERS {
            s.spawn(move || {
                let index = worker_id as u64;
                for _ in 0..ROUNDS {
                    let lease = coordinator.acquire(Request::update(index, 1)).unwrap();
                    let update = file.update_balance(&lease, index, 1).unwrap();
                    lease.release(update.into()).unwrap();
                }
            });
        }
    });
}

/// 多线程，所有worker争用同一条记录
fn bench_contended_threads(coordinator: &Coordinator, file: &RecordFile) {
    std::thread::scope(|s| {
        for _ in 0..NUM_WORKERS {
            s.spawn(move || {
                for _ in 0..ROUNDS {
                    let lease = coordinator.acquire(Request::update(0, 1)).unwrap();
                    let update = file.update_balance(&lease, 0, 1).unwrap();
                    lease.release(update.into()).unwrap();
                }
            });
        }
    });
}

/// 使用 tokio::task::spawn_blocking 运行读写混合负载
async fn bench_mixed_tokio(coordinator: Coordinator, file: RecordFile) {
    let mut handles = vec![];

    for worker_id in 0..NUM_WORKERS {
        let coordinator = coordinator.clone();
        let file = file.clone();

        // 信号量等待会阻塞线程，不能放在异步任务里
        handles.push(tokio::task::spawn_blocking(move || {
            for round in 0..ROUNDS {
                let start = (round as u64 * READ_SPAN / 2) % (RECORDS - READ_SPAN);
                if worker_id % 2 == 0 {
                    let range = RecordRange::new(start, start + READ_SPAN - 1).unwrap();
                    let lease = coordinator.acquire(Request::read(range)).unwrap();
                    let records = file.read(&lease).unwrap();
                    lease
                        .release(Outcome::Read { records: records.len() as u64 })
                        .unwrap();
                } else {
                    let lease = coordinator.acquire(Request::update(start, 1)).unwrap();
                    let update = file.update_balance(&lease, start, 1).unwrap();
                    lease.release(update.into()).unwrap();
                }
            }
        }));
    }

    // 等待所有任务完成
    for handle in handles {
        handle.await.unwrap();
    }
}

fn admission_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("admission");
    group.sample_size(20);

    let (_dir, coordinator, file) = setup();
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let label = format!("{}rounds_{}workers", ROUNDS, NUM_WORKERS);

    group.bench_function(BenchmarkId::new("uncontended", ROUNDS), |b| {
        b.iter(|| bench_uncontended(&coordinator, &file));
    });

    group.bench_function(BenchmarkId::new("disjoint_threads", &label), |b| {
        b.iter(|| bench_disjoint_threads(&coordinator, &file));
    });

    group.bench_function(BenchmarkId::new("contended_threads", &label), |b| {
        b.iter(|| bench_contended_threads(&coordinator, &file));
    });

    group.bench_function(BenchmarkId::new("mixed_tokio", &label), |b| {
        b.to_async(&runtime)
            .iter(|| bench_mixed_tokio(coordinator.clone(), file.clone()));
    });

    group.finish();
}

criterion_group!(benches, admission_benchmark);
criterion_main!(benches);
