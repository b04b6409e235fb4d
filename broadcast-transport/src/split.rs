//! Fan-out transform
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::atomic_cell::AtomicCell;
use crate::pipeline::{FrameMetadata, Output, Transform};
use std::sync::{Arc, Weak};
use std::time::Instant;

/// Forwards every buffer to each bound output
///
/// Outputs are held weakly and pruned once they are dropped. Binding the same
/// output twice has no effect.
#[derive(Default)]
pub struct Split {
    outputs: AtomicCell<Vec<Weak<dyn Output>>>,
}

impl Split {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remove_output(&self, output: &Arc<dyn Output>) {
        let target = Arc::downgrade(output);
        self.outputs.modify(|outputs| outputs.retain(|o| !Weak::ptr_eq(o, &target)));
    }

    /// Live outputs
    pub fn output_count(&self) -> usize {
        self.outputs
            .with_value(|outputs| outputs.iter().filter(|o| o.strong_count() > 0).count())
    }

    fn live_outputs(&self) -> Vec<Arc<dyn Output>> {
        self.outputs.modify(|outputs| {
            outputs.retain(|o| o.strong_count() > 0);
            outputs.iter().filter_map(Weak::upgrade).collect()
        })
    }
}

impl Output for Split {
    fn set_epoch(&self, epoch: Instant) {
        for output in self.live_outputs() {
            output.set_epoch(epoch);
        }
    }

    fn push_buffer(&self, data: &[u8], metadata: &FrameMetadata) {
        // Outside the lock so an output may rebind the split
        for output in self.live_outputs() {
            output.push_buffer(data, metadata);
        }
    }
}

impl Transform for Split {
    fn set_output(&self, output: &Arc<dyn Output>) {
        let candidate = Arc::downgrade(output);
        self.outputs.modify(|outputs| {
            outputs.retain(|o| o.strong_count() > 0);
            if !outputs.iter().any(|o| Weak::ptr_eq(o, &candidate)) {
                outputs.push(candidate);
            }
        });
    }
}
