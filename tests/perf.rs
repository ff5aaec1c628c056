#![cfg(feature = "memory-store")]

use futures::executor::block_on;
use std::hint::black_box;
use std::sync::Arc;
use std::time::Instant;
use tenant_acl::{
    Actor, ActorName, AuthzBuilder, Group, ItemRef, MemoryAdapter, MemoryStore, Member,
    Organization, PermissionChecker, User,
};

const REPEATS: usize = 5;

fn benchmark_sync<F>(name: &str, iterations: usize, mut op: F)
where
    F: FnMut(),
{
    let mut samples = Vec::with_capacity(REPEATS);

    for _ in 0..REPEATS {
        let start = Instant::now();
        for _ in 0..iterations {
            op();
        }
        samples.push(start.elapsed());
    }

    samples.sort_unstable();
    let median = samples[REPEATS / 2];
    let total_ms = median.as_secs_f64() * 1_000.0;
    let ns_per_op = median.as_secs_f64() * 1_000_000_000.0 / iterations as f64;

    println!("{name}: median={total_ms:.3} ms, ns/op={ns_per_op:.1} (iters={iterations})");
}

fn benchmark_parallel<F>(name: &str, threads: usize, iterations_per_thread: usize, op_factory: F)
where
    F: Fn() -> Box<dyn FnMut() + Send> + Send + Sync + 'static,
{
    let op_factory = Arc::new(op_factory);
    let mut samples = Vec::with_capacity(REPEATS);

    for _ in 0..REPEATS {
        let start = Instant::now();
        let joins: Vec<_> = (0..threads)
            .map(|_| {
                let factory = Arc::clone(&op_factory);
                std::thread::spawn(move || {
                    let mut op = factory();
                    for _ in 0..iterations_per_thread {
                        op();
                    }
                })
            })
            .collect();
        for join in joins {
            join.join().expect("thread panicked");
        }
        samples.push(start.elapsed());
    }

    samples.sort_unstable();
    let median = samples[REPEATS / 2];
    let total_ops = threads * iterations_per_thread;
    let ns_per_op = median.as_secs_f64() * 1_000_000_000.0 / total_ops as f64;

    println!("{name}: ns/op={ns_per_op:.1} (threads={threads}, total_ops={total_ops})");
}

/// Tenant where `perf_user` reaches a grant on `nodes/web01` through a
/// chain of `depth` nested groups.
fn setup_chain(depth: usize) -> (Arc<Organization>, Actor, ItemRef) {
    let authz = AuthzBuilder::new(MemoryStore::new(), MemoryAdapter::new())
        .max_role_depth(depth + 2)
        .build();
    let org = block_on(authz.create_org("perf", None, None)).unwrap();
    let name = ActorName::try_from("perf_user").unwrap();
    let item = ItemRef::new("nodes", "web01");

    let mut previous = block_on(Group::create(&org, "chain-0")).unwrap();
    block_on(previous.add_actor(&org, &name)).unwrap();
    for i in 1..=depth {
        let mut next = block_on(Group::create(&org, &format!("chain-{i}"))).unwrap();
        block_on(next.add_group(&org, &previous)).unwrap();
        previous = next;
    }
    block_on(org.edit_item_perm(&item, &Member::Group(previous.name().clone()), &["read"], "add"))
        .unwrap();

    (org, Actor::from(User::new(name)), item)
}

#[test]
#[ignore = "manual performance test; run with --ignored --nocapture"]
fn perf_item_checks() {
    let iterations = 200_000;

    let (org, actor, item) = setup_chain(0);
    assert!(block_on(org.check_item_perm(&item, &actor, "read")).unwrap());
    benchmark_sync("check_item_direct_group", iterations, || {
        black_box(block_on(org.check_item_perm(&item, &actor, "read")).unwrap());
    });
    benchmark_sync("check_item_denied", iterations, || {
        black_box(block_on(org.check_item_perm(&item, &actor, "delete")).unwrap());
    });

    let (org, actor, item) = setup_chain(8);
    assert!(block_on(org.check_item_perm(&item, &actor, "read")).unwrap());
    benchmark_sync("check_item_chain_depth8", iterations / 4, || {
        black_box(block_on(org.check_item_perm(&item, &actor, "read")).unwrap());
    });

    let threads = std::thread::available_parallelism()
        .map(|n| n.get().min(8))
        .unwrap_or(4);
    let (org, actor, item) = setup_chain(2);
    benchmark_parallel("check_item_parallel", threads, 50_000, move || {
        let org = Arc::clone(&org);
        let actor = actor.clone();
        let item = item.clone();
        Box::new(move || {
            black_box(block_on(org.check_item_perm(&item, &actor, "read")).unwrap());
        })
    });
}
