//! # Pixel jobs
//!
//! Long pixel transforms run on the rayon pool against a snapshot of the content they change.
//! Nothing is written to the image until the owner joins them, which applies each job's result
//! as one macro. Jobs can't be cancelled once started.

use crate::raster::Selection;
use crate::state::graph::{NodeID, NodeKind};

/// Replace the content of `target`, which was `from` when the job was started.
#[derive(Clone, Debug)]
pub struct ContentUpdate {
    pub target: NodeID,
    pub from: NodeKind,
    pub to: NodeKind,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("job panicked: {0}")]
    Panicked(String),
}

pub struct JobOutcome {
    /// Name of the macro the result is applied as.
    pub label: String,
    sequence: u64,
    pub result: Result<Vec<ContentUpdate>, JobError>,
}

pub struct JobPool {
    // We hold a sender ourselves, so receiving never sees a disconnect.
    sender: crossbeam::channel::Sender<JobOutcome>,
    receiver: crossbeam::channel::Receiver<JobOutcome>,
    outstanding: usize,
    next_sequence: u64,
}
impl Default for JobPool {
    fn default() -> Self {
        let (sender, receiver) = crossbeam::channel::unbounded();
        Self {
            sender,
            receiver,
            outstanding: 0,
            next_sequence: 0,
        }
    }
}
impl JobPool {
    /// Run `work` on the pool.
    pub fn spawn<F>(&mut self, label: impl Into<String>, work: F)
    where
        F: FnOnce() -> Vec<ContentUpdate> + Send + 'static,
    {
        let label = label.into();
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.outstanding += 1;
        let sender = self.sender.clone();
        log::trace!("Starting job {sequence} ({label})");
        rayon::spawn(move || {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(work))
                .map_err(|payload| JobError::Panicked(panic_message(payload.as_ref())));
            let outcome = JobOutcome {
                label,
                sequence,
                result,
            };
            if sender.send(outcome).is_err() {
                log::warn!("job {sequence} finished after its image was dropped");
            }
        });
    }
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }
    /// Wait for every outstanding job. Outcomes are in the order the jobs were started.
    pub fn join(&mut self) -> Vec<JobOutcome> {
        let mut outcomes = Vec::with_capacity(self.outstanding);
        while self.outstanding > 0 {
            match self.receiver.recv() {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    log::error!("job channel closed: {err}");
                    break;
                }
            }
            self.outstanding -= 1;
        }
        outcomes.sort_by_key(|outcome| outcome.sequence);
        outcomes
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

/// Rotated copy of a node's content, or `None` if rotating leaves it unchanged.
#[must_use]
pub fn rotate_kind(kind: &NodeKind, radians: f64, pivot: (f64, f64)) -> Option<NodeKind> {
    let rotate_selection = |selection: &Selection| selection.rotated(radians, pivot);
    match kind {
        NodeKind::Paint { frames } => Some(NodeKind::Paint {
            frames: frames
                .iter()
                .map(|frame| std::sync::Arc::new(frame.rotated(radians, pivot)))
                .collect(),
        }),
        NodeKind::Adjustment {
            filter,
            selection: Some(selection),
        } => Some(NodeKind::Adjustment {
            filter: filter.clone(),
            selection: Some(rotate_selection(selection)),
        }),
        NodeKind::Generator {
            config,
            selection: Some(selection),
        } => Some(NodeKind::Generator {
            config: config.clone(),
            selection: Some(rotate_selection(selection)),
        }),
        NodeKind::SelectionMask { selection } => Some(NodeKind::SelectionMask {
            selection: rotate_selection(selection),
        }),
        NodeKind::TransparencyMask { selection } => Some(NodeKind::TransparencyMask {
            selection: rotate_selection(selection),
        }),
        // Shapes are axis-aligned and can't hold an arbitrary turn.
        NodeKind::Shape { .. } => {
            log::info!("shape layers are not rotated");
            None
        }
        NodeKind::Group { .. }
        | NodeKind::Adjustment { .. }
        | NodeKind::Generator { .. }
        | NodeKind::Clone { .. }
        | NodeKind::File { .. } => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::color::Color;
    use crate::raster::{Raster, Rect};

    #[test]
    fn outcomes_keep_start_order() {
        let mut pool = JobPool::default();
        for i in 0..8u64 {
            pool.spawn(format!("job {i}"), move || {
                std::thread::sleep(std::time::Duration::from_millis(8 - i));
                Vec::new()
            });
        }
        assert_eq!(pool.outstanding(), 8);
        let labels: Vec<_> = pool.join().into_iter().map(|o| o.label).collect();
        assert_eq!(labels, (0..8).map(|i| format!("job {i}")).collect::<Vec<_>>());
        assert_eq!(pool.outstanding(), 0);
    }
    #[test]
    fn panics_are_reported() {
        let mut pool = JobPool::default();
        pool.spawn("doomed", || panic!("out of pixels"));
        let outcomes = pool.join();
        assert_eq!(
            outcomes[0].result.as_ref().err(),
            Some(&JobError::Panicked("out of pixels".into()))
        );
    }
    #[test]
    fn groups_are_left_alone() {
        assert!(rotate_kind(&NodeKind::group(), 1.0, (0.0, 0.0)).is_none());
        let paint = NodeKind::paint(Raster::filled(Rect::new(0, 0, 2, 1), Color::WHITE));
        let Some(NodeKind::Paint { frames }) =
            rotate_kind(&paint, std::f64::consts::FRAC_PI_2, (1.0, 1.0))
        else {
            panic!("paint should rotate");
        };
        assert_eq!(frames[0].rect().width, 1);
        assert_eq!(frames[0].rect().height, 2);
    }
}
