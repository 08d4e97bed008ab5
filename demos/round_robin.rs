//! Round-robin over a handful of microthreads: each one counts a few steps,
//! yielding between them, until everyone has finished.

use uthread::{suspend, Activity, Payload, UThread};

fn main() -> uthread::Result<()> {
  let workers: Vec<UThread> = (0..3)
    .map(|i| UThread::builder().name(format!("worker{i}")).build())
    .collect::<uthread::Result<_>>()?;

  for (i, ut) in workers.iter().enumerate() {
    ut.start(move || {
      for step in 1..=3 {
        println!("worker {i} step {step}");
        suspend(Payload::None).unwrap();
      }
      println!("worker {i} done");
    })?;
  }

  loop {
    let mut progressed = false;
    for ut in &workers {
      if ut.active() == Activity::Suspended {
        ut.resume(Payload::None)?;
        progressed = true;
      }
    }
    if !progressed {
      break;
    }
  }
  Ok(())
}
