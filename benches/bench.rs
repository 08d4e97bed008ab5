use criterion::*;
use uthread::{suspend, Payload, UThread};

#[cfg(all(feature = "asm", unix, target_arch = "x86_64"))]
use uthread::Backend;

fn spawn(c: &mut Criterion) {
  let mut group = c.benchmark_group("spawn");
  group.throughput(Throughput::Elements(1));
  group.bench_function("thread", |b| {
    b.iter(|| {
      let ut = UThread::builder().stack_size(64 * 1024).build().unwrap();
      ut.dispose().unwrap();
    });
  });
  #[cfg(all(feature = "asm", unix, target_arch = "x86_64"))]
  group.bench_function("native", |b| {
    b.iter(|| {
      let ut = UThread::builder()
        .backend(Backend::Native)
        .stack_size(64 * 1024)
        .build()
        .unwrap();
      ut.dispose().unwrap();
    });
  });
}

fn yielder() -> impl FnOnce() + Send + 'static {
  || loop {
    suspend(Payload::None).unwrap();
  }
}

fn ping_pong(c: &mut Criterion) {
  let mut group = c.benchmark_group("ping_pong");
  group.throughput(Throughput::Elements(1));
  group.bench_function("thread", |b| {
    let ut = UThread::builder().stack_size(64 * 1024).build().unwrap();
    ut.start(yielder()).unwrap();
    b.iter(|| {
      black_box(ut.resume(Payload::None).unwrap());
    });
    ut.dispose().unwrap();
  });
  #[cfg(all(feature = "asm", unix, target_arch = "x86_64"))]
  group.bench_function("native", |b| {
    let ut = UThread::builder()
      .backend(Backend::Native)
      .stack_size(64 * 1024)
      .build()
      .unwrap();
    ut.start(yielder()).unwrap();
    b.iter(|| {
      black_box(ut.resume(Payload::None).unwrap());
    });
    ut.dispose().unwrap();
  });
}

criterion_group!(
  benches,
  spawn,
  ping_pong,
);
criterion_main!(benches);
