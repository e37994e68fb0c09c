use crate::registry::WorkerView;

/// The worker with the smallest average RTT. Workers without a measurement
/// are skipped; on a tie the earlier registration wins.
pub fn estimate(workers: &[WorkerView]) -> Option<&WorkerView> {
    let mut best: Option<(&WorkerView, f64)> = None;
    for worker in workers {
        let Some(rtt) = worker.avg_rtt else { continue };
        match best {
            Some((_, best_rtt)) if best_rtt <= rtt => {}
            _ => best = Some((worker, rtt)),
        }
    }
    best.map(|(worker, _)| worker)
}
