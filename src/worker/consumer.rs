use super::{WorkerContext, WorkerExit, WorkerReport};
use crate::channel::Take;
use crate::config::DelayRange;
use crate::error::{ChannelError, PipelineError};
use crate::events::PipelineEvent;
use crate::types::{Envelope, WorkerId};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::{Duration, Instant};

/// Drains the shared channel until it sees the termination marker
pub struct Consumer {
    id: WorkerId,
    delay: DelayRange,
    take_timeout: Duration,
    ctx: WorkerContext,
}

impl Consumer {
    pub fn new(index: usize, delay: DelayRange, take_timeout: Duration, ctx: WorkerContext) -> Self {
        Self {
            id: WorkerId::consumer(index),
            delay,
            take_timeout,
            ctx,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub async fn run(self) -> Result<WorkerReport, PipelineError> {
        let _active = self.ctx.activate(self.id);
        let mut rng = StdRng::from_entropy();
        let mut consumed = 0;

        let exit = loop {
            let envelope = match self.ctx.channel.take(self.take_timeout, &self.ctx.cancel).await {
                Ok(Take::Item(envelope)) => envelope,
                // an idle channel says nothing about whether producers are done
                Ok(Take::Empty) => continue,
                Err(err) => break exit_for(err),
            };

            let item = match envelope {
                Envelope::Data(item) => item,
                Envelope::Terminate => {
                    // leave exactly one marker behind for the next consumer
                    break match self.ctx.channel.put(Envelope::Terminate, &self.ctx.cancel).await {
                        Ok(()) => WorkerExit::Terminated,
                        Err(err) => exit_for(err),
                    };
                }
            };

            if !self.ctx.pause(self.delay.sample(&mut rng)).await {
                break WorkerExit::Cancelled;
            }

            let done = self.ctx.ledger.complete(item.id(), Instant::now())?;
            consumed += 1;
            self.ctx.stats.item_consumed(done.latency());
            self.ctx.emit(PipelineEvent::ItemConsumed {
                worker: self.id,
                item: done.id,
                latency_ms: done.latency_ms(),
            });
        };

        Ok(self.ctx.finish(self.id, exit, consumed))
    }
}

fn exit_for(err: ChannelError) -> WorkerExit {
    match err {
        ChannelError::Cancelled => WorkerExit::Cancelled,
        ChannelError::Closed => WorkerExit::ChannelClosed,
    }
}
