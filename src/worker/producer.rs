use super::{WorkerContext, WorkerExit, WorkerReport};
use crate::config::DelayRange;
use crate::error::{ChannelError, PipelineError};
use crate::events::PipelineEvent;
use crate::types::{Envelope, Item, WorkerId};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Instant;

/// Emits a fixed quota of items into the shared channel
pub struct Producer {
    id: WorkerId,
    quota: usize,
    delay: DelayRange,
    ctx: WorkerContext,
}

impl Producer {
    pub fn new(index: usize, quota: usize, delay: DelayRange, ctx: WorkerContext) -> Self {
        Self {
            id: WorkerId::producer(index),
            quota,
            delay,
            ctx,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub async fn run(self) -> Result<WorkerReport, PipelineError> {
        let _active = self.ctx.activate(self.id);
        let mut rng = StdRng::from_entropy();
        let mut produced = 0;

        for sequence in 1..=self.quota {
            let mut item = Item::new();
            item.stamp_created(Instant::now())?;

            if !self.ctx.pause(self.delay.sample(&mut rng)).await {
                return Ok(self.ctx.finish(self.id, WorkerExit::Cancelled, produced));
            }

            // registered before the put so no consumer can see an unknown id
            self.ctx.ledger.register(&item)?;
            let id = item.id();

            match self.ctx.channel.put(Envelope::Data(item), &self.ctx.cancel).await {
                Ok(()) => {}
                Err(ChannelError::Cancelled) => {
                    return Ok(self.ctx.finish(self.id, WorkerExit::Cancelled, produced));
                }
                Err(ChannelError::Closed) => {
                    return Ok(self.ctx.finish(self.id, WorkerExit::ChannelClosed, produced));
                }
            }

            produced += 1;
            self.ctx.stats.item_produced();
            self.ctx.emit(PipelineEvent::ItemProduced {
                worker: self.id,
                item: id,
                sequence,
            });
        }

        Ok(self.ctx.finish(self.id, WorkerExit::QuotaReached, produced))
    }
}
