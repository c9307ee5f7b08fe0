//! Performance benchmarks for RedVault server
//!
//! Measures latency and throughput of the string, hash and pub/sub paths
//! against a running server.

use clap::Parser;
use redvault::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// RedVault benchmark
#[derive(Parser, Debug)]
#[command(name = "redvault-benchmark")]
struct Args {
    /// Server address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:7000")]
    addr: String,

    /// Operations per single-client run
    #[arg(short = 'n', long, default_value_t = 10000)]
    operations: usize,
}

#[derive(Debug)]
struct BenchmarkResults {
    operation: String,
    total_operations: usize,
    duration: Duration,
    ops_per_second: f64,
    avg_latency_ms: f64,
    p95_latency_ms: f64,
    p99_latency_ms: f64,
}

impl BenchmarkResults {
    fn new(operation: String, total_operations: usize, duration: Duration, latencies: &mut [Duration]) -> Self {
        latencies.sort();

        let ops_per_second = total_operations as f64 / duration.as_secs_f64();
        let avg_latency_ms = latencies.iter().map(|d| d.as_secs_f64() * 1000.0).sum::<f64>()
            / latencies.len().max(1) as f64;

        let percentile = |p: f64| {
            let index = (latencies.len() as f64 * p) as usize;
            latencies.get(index).copied().unwrap_or(Duration::ZERO).as_secs_f64() * 1000.0
        };

        Self {
            operation,
            total_operations,
            duration,
            ops_per_second,
            avg_latency_ms,
            p95_latency_ms: percentile(0.95),
            p99_latency_ms: percentile(0.99),
        }
    }

    fn print(&self) {
        println!("=== {} ===", self.operation);
        println!("Total operations: {}", self.total_operations);
        println!("Duration: {:.2}s", self.duration.as_secs_f64());
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
        println!("Average latency: {:.3}ms", self.avg_latency_ms);
        println!("P95 latency: {:.3}ms", self.p95_latency_ms);
        println!("P99 latency: {:.3}ms", self.p99_latency_ms);
        println!();
    }
}

type BenchResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[tokio::main]
async fn main() -> BenchResult<()> {
    let args = Args::parse();

    println!("RedVault Performance Benchmarks");
    println!("===============================");
    println!("Server: {}", args.addr);
    println!();

    println!("Waiting for server to be ready...");
    loop {
        if let Ok(mut client) = Client::connect(&args.addr).await {
            if client.ping().await.is_ok() {
                let _ = client.close().await;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    println!();

    println!("Running single client benchmarks...");
    benchmark_set(&args.addr, args.operations).await?.print();
    benchmark_get(&args.addr, args.operations).await?.print();
    benchmark_hash(&args.addr, args.operations).await?.print();
    benchmark_mixed(&args.addr, args.operations).await?.print();
    benchmark_publish(&args.addr, args.operations).await?.print();

    println!("Running concurrent client benchmarks...");
    for num_clients in [10, 50, 100] {
        benchmark_concurrent(&args.addr, num_clients, 1000).await?.print();
    }

    Ok(())
}

async fn benchmark_set(addr: &str, num_operations: usize) -> BenchResult<BenchmarkResults> {
    let mut client = Client::connect(addr).await?;
    let mut latencies = Vec::with_capacity(num_operations);

    let start = Instant::now();
    for i in 0..num_operations {
        let key = format!("bench_key_{}", i);
        let value = format!("bench_value_{}", i);

        let op_start = Instant::now();
        client.set(&key, &value).await?;
        latencies.push(op_start.elapsed());
    }
    let total_duration = start.elapsed();
    client.close().await?;

    Ok(BenchmarkResults::new("SET".to_string(), num_operations, total_duration, &mut latencies))
}

async fn benchmark_get(addr: &str, num_operations: usize) -> BenchResult<BenchmarkResults> {
    let mut client = Client::connect(addr).await?;
    for i in 0..num_operations {
        client.set(format!("get_bench_key_{}", i), format!("get_bench_value_{}", i)).await?;
    }

    let mut latencies = Vec::with_capacity(num_operations);
    let start = Instant::now();
    for i in 0..num_operations {
        let key = format!("get_bench_key_{}", i);

        let op_start = Instant::now();
        let _value = client.get(&key).await?;
        latencies.push(op_start.elapsed());
    }
    let total_duration = start.elapsed();
    client.close().await?;

    Ok(BenchmarkResults::new("GET".to_string(), num_operations, total_duration, &mut latencies))
}

async fn benchmark_hash(addr: &str, num_operations: usize) -> BenchResult<BenchmarkResults> {
    let mut client = Client::connect(addr).await?;
    let mut latencies = Vec::with_capacity(num_operations);

    let start = Instant::now();
    for i in 0..num_operations {
        let key = format!("bench_hash_{}", i % 100);
        let field = format!("field_{}", i);

        let op_start = Instant::now();
        if i % 2 == 0 {
            client.hset(&key, [(&field, "value")]).await?;
        } else {
            let _value = client.hget(&key, &field).await?;
        }
        latencies.push(op_start.elapsed());
    }
    let total_duration = start.elapsed();
    client.close().await?;

    Ok(BenchmarkResults::new("HSET/HGET".to_string(), num_operations, total_duration, &mut latencies))
}

async fn benchmark_mixed(addr: &str, num_operations: usize) -> BenchResult<BenchmarkResults> {
    let mut client = Client::connect(addr).await?;
    let mut latencies = Vec::with_capacity(num_operations);

    let start = Instant::now();
    for i in 0..num_operations {
        // Reuse keys so reads and deletes hit
        let key = format!("mixed_key_{}", i % 1000);

        let op_start = Instant::now();
        match i % 10 {
            0..=6 => {
                let _value = client.get(&key).await?;
            }
            7..=8 => {
                client.set(&key, format!("mixed_value_{}", i)).await?;
            }
            _ => {
                let _deleted = client.del([&key]).await?;
            }
        }
        latencies.push(op_start.elapsed());
    }
    let total_duration = start.elapsed();
    client.close().await?;

    Ok(BenchmarkResults::new("Mixed Workload".to_string(), num_operations, total_duration, &mut latencies))
}

/// PUBLISH round trips with one subscriber attached
async fn benchmark_publish(addr: &str, num_operations: usize) -> BenchResult<BenchmarkResults> {
    let mut subscriber = Client::connect(addr).await?;
    subscriber.subscribe(["bench_channel"]).await?;

    let drain = tokio::spawn(async move {
        for _ in 0..num_operations {
            subscriber.next_message().await?;
        }
        subscriber.close().await
    });

    let mut publisher = Client::connect(addr).await?;
    let mut latencies = Vec::with_capacity(num_operations);

    let start = Instant::now();
    for i in 0..num_operations {
        let op_start = Instant::now();
        publisher.publish("bench_channel", format!("payload_{}", i)).await?;
        latencies.push(op_start.elapsed());
    }
    drain.await??;
    let total_duration = start.elapsed();
    publisher.close().await?;

    Ok(BenchmarkResults::new("PUBLISH (1 subscriber)".to_string(), num_operations, total_duration, &mut latencies))
}

async fn benchmark_concurrent(
    addr: &str,
    num_clients: usize,
    ops_per_client: usize,
) -> BenchResult<BenchmarkResults> {
    let semaphore = Arc::new(Semaphore::new(num_clients));
    let mut handles = Vec::with_capacity(num_clients);
    let mut all_latencies = Vec::with_capacity(num_clients * ops_per_client);

    let start = Instant::now();

    for client_id in 0..num_clients {
        let semaphore = Arc::clone(&semaphore);
        let addr = addr.to_string();

        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await?;
            let mut client = Client::connect(&addr).await?;
            let mut latencies = Vec::with_capacity(ops_per_client);

            for i in 0..ops_per_client {
                let key = format!("concurrent_key_{}_{}", client_id, i);

                let op_start = Instant::now();
                client.set(&key, format!("concurrent_value_{}_{}", client_id, i)).await?;
                latencies.push(op_start.elapsed());
            }

            client.close().await?;
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(latencies)
        }));
    }

    for handle in handles {
        all_latencies.extend(handle.await??);
    }

    let total_duration = start.elapsed();

    Ok(BenchmarkResults::new(
        format!("Concurrent SET ({} clients)", num_clients),
        num_clients * ops_per_client,
        total_duration,
        &mut all_latencies,
    ))
}
