//! Worker pool: arithmetic-only threads fed by a shared job channel.
//!
//! Workers hold no long-lived resources and no shared mutable state;
//! everything arrives in the job message and leaves in the response.

use crate::messages::{WorkerRequest, WorkerResponse};
use crate::reference_orbit::ReferenceOrbit;
use crate::tile_render::{render_tile, RenderOutcome};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, warn};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

pub struct WorkerPool {
    job_tx: Sender<WorkerRequest>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `threads` workers sharing one job queue. Responses fan in
    /// through `result_tx`.
    pub fn new(threads: usize, result_tx: Sender<WorkerResponse>) -> Self {
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<WorkerRequest>();
        let mut handles = Vec::with_capacity(threads);
        for id in 0..threads {
            let rx = job_rx.clone();
            let tx = result_tx.clone();
            handles.push(
                std::thread::Builder::new()
                    .name(format!("abyssal-worker-{id}"))
                    .spawn(move || worker_loop(rx, tx))
                    .expect("spawn worker thread"),
            );
        }
        Self { job_tx, handles }
    }

    pub fn submit(&self, request: WorkerRequest) {
        // A closed channel only happens during teardown; jobs sent into
        // it are already obsolete.
        let _ = self.job_tx.send(request);
    }

    pub fn thread_count(&self) -> usize {
        self.handles.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for _ in &self.handles {
            let _ = self.job_tx.send(WorkerRequest::Shutdown);
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(jobs: Receiver<WorkerRequest>, results: Sender<WorkerResponse>) {
    while let Ok(request) = jobs.recv() {
        match request {
            WorkerRequest::Shutdown => break,
            WorkerRequest::Render(job) => {
                if job.cancel.is_cancelled() {
                    let _ = results.send(WorkerResponse::TileCancelled {
                        job_id: job.job_id,
                        key: job.key,
                    });
                    continue;
                }
                let started = Instant::now();
                let mut on_rows = |rows_done: u32| {
                    let _ = results.send(WorkerResponse::Progress {
                        job_id: job.job_id,
                        rows_done,
                    });
                };
                let response = match render_tile(&job.input, &job.cancel, &mut on_rows) {
                    Ok(RenderOutcome::Complete {
                        pixels,
                        glitched_px,
                    }) => WorkerResponse::TileComplete {
                        job_id: job.job_id,
                        key: job.key,
                        tier: job.input.tier,
                        pixels,
                        glitched_px,
                        render_time_ms: started.elapsed().as_secs_f32() * 1000.0,
                    },
                    Ok(RenderOutcome::Cancelled) => WorkerResponse::TileCancelled {
                        job_id: job.job_id,
                        key: job.key,
                    },
                    Err(err) => WorkerResponse::TileError {
                        job_id: job.job_id,
                        key: job.key,
                        message: err.to_string(),
                    },
                };
                let _ = results.send(response);
            }
            WorkerRequest::ComputeOrbit {
                job_id,
                center_re,
                center_im,
                scale,
                max_iter,
                limbs,
            } => {
                let started = Instant::now();
                match ReferenceOrbit::compute(&center_re, &center_im, scale, max_iter, limbs) {
                    Ok(orbit) => {
                        let ms = started.elapsed().as_secs_f32() * 1000.0;
                        debug!(
                            "reference orbit: {} iterations in {ms:.0}ms, escape={:?}",
                            orbit.iterations(),
                            orbit.escape_iter
                        );
                        let _ = results.send(WorkerResponse::OrbitComplete {
                            job_id,
                            orbit: Arc::new(orbit),
                            compute_time_ms: ms,
                        });
                    }
                    Err(err) => {
                        warn!("reference orbit failed: {err}");
                        let _ = results.send(WorkerResponse::OrbitError {
                            job_id,
                            message: err.to_string(),
                        });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancelToken;
    use crate::messages::{JobPriority, TileJob};
    use crate::tile_render::TileRenderInput;
    use abyssal_core::{Tier, TileCoord, TileKey};
    use std::time::Duration;

    fn job(job_id: u64, coord: TileCoord) -> TileJob {
        TileJob {
            job_id,
            key: TileKey::new(coord, 256),
            priority: JobPriority::Visible,
            input: TileRenderInput {
                coord,
                tile_size: 32,
                max_iter: 256,
                tier: Tier::Standard,
                escape_radius_sq: 4.0,
                glitch_epsilon: 1e-4,
                limbs: 4,
                orbit: None,
            },
            cancel: CancelToken::new(),
        }
    }

    #[test]
    fn pool_renders_and_responds() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let pool = WorkerPool::new(2, tx);
        let coord = TileCoord::containing(4, -0.5, 0.0);
        pool.submit(WorkerRequest::Render(Box::new(job(1, coord))));

        let deadline = Instant::now() + Duration::from_secs(30);
        loop {
            let msg = rx.recv_deadline(deadline).expect("worker response");
            match msg {
                WorkerResponse::Progress { job_id, .. } => assert_eq!(job_id, 1),
                WorkerResponse::TileComplete {
                    job_id,
                    pixels,
                    glitched_px,
                    ..
                } => {
                    assert_eq!(job_id, 1);
                    assert_eq!(pixels.len(), 32 * 32);
                    assert_eq!(glitched_px, 0);
                    break;
                }
                other => panic!("unexpected response {other:?}"),
            }
        }
    }

    #[test]
    fn pre_cancelled_job_reports_cancelled() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let pool = WorkerPool::new(1, tx);
        let coord = TileCoord::containing(4, -0.5, 0.0);
        let mut j = job(7, coord);
        j.cancel.cancel();
        pool.submit(WorkerRequest::Render(Box::new(j)));
        match rx
            .recv_timeout(Duration::from_secs(30))
            .expect("worker response")
        {
            WorkerResponse::TileCancelled { job_id, .. } => assert_eq!(job_id, 7),
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn orbit_job_round_trips() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let pool = WorkerPool::new(1, tx);
        pool.submit(WorkerRequest::ComputeOrbit {
            job_id: 3,
            center_re: "-0.5".into(),
            center_im: "0".into(),
            scale: 1e-3,
            max_iter: 500,
            limbs: 8,
        });
        match rx
            .recv_timeout(Duration::from_secs(30))
            .expect("worker response")
        {
            WorkerResponse::OrbitComplete { job_id, orbit, .. } => {
                assert_eq!(job_id, 3);
                assert_eq!(orbit.iterations(), 500);
            }
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn shutdown_joins_all_threads() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let pool = WorkerPool::new(4, tx);
        assert_eq!(pool.thread_count(), 4);
        drop(pool); // joins without hanging
    }
}
