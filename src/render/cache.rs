// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Memoized prerendering of virtual instruments.
//!
//! A rendered set is looked up in the sample library first. If it isn't there, every
//! sample of the source set is rendered through the [`RenderQueue`], the result is saved
//! back to the library, and the set is returned. At most one render per rendered name
//! is in flight at a time; concurrent callers share its outcome.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{error, info};

use super::queue::RenderQueue;
use crate::audio::{effects, offline, AudioBuffer};
use crate::config::error::ConfigError;
use crate::config::InstrumentDefinition;
use crate::error::Error;
use crate::library::SampleLibrary;
use crate::samples::{BufferSet, SampleKey, SampleSource};

/// Receives render progress as a fraction in `[0, 1]`.
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

type RenderedMap = BTreeMap<SampleKey, AudioBuffer>;
type Outcome = Option<Result<Arc<RenderedMap>, Error>>;
type RenderFuture = Pin<Box<dyn Future<Output = Result<AudioBuffer, Error>> + Send>>;
type RenderFn = Arc<dyn Fn(SampleKey, AudioBuffer) -> RenderFuture + Send + Sync>;
type Registry = Arc<Mutex<HashMap<String, watch::Receiver<Outcome>>>>;

/// Removes a render from the in-flight registry when its task finishes, including by
/// panicking.
struct InFlightGuard {
    registry: Registry,
    name: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.name);
    }
}

/// One render of a source set into a rendered set.
struct Prerender {
    library: Arc<dyn SampleLibrary>,
    queue: RenderQueue,
    sample_rate: u32,
    source_name: String,
    rendered_name: String,
    render_one: RenderFn,
    progress: Option<ProgressFn>,
}

impl Prerender {
    fn report(&self, completed: usize, total: usize) {
        if let Some(progress) = &self.progress {
            if completed >= total {
                progress(1.0);
            } else {
                progress(completed as f64 / total as f64);
            }
        }
    }

    async fn request(&self, name: &str) -> Result<Option<RenderedMap>, Error> {
        let found = self
            .library
            .request(&[name.to_string()])
            .await?
            .remove(name);
        match found {
            Some(source) => Ok(Some(
                BufferSet::load(source, self.sample_rate)
                    .await?
                    .into_buffers()?,
            )),
            None => Ok(None),
        }
    }

    async fn run(self) -> Result<Arc<RenderedMap>, Error> {
        if let Some(rendered) = self.request(&self.rendered_name).await? {
            info!(
                rendered = self.rendered_name,
                samples = rendered.len(),
                "Prerender cache hit"
            );
            self.report(1, 1);
            return Ok(Arc::new(rendered));
        }

        let source = self.request(&self.source_name).await?.ok_or_else(|| {
            Error::Library(format!("no sample set named '{}'", self.source_name))
        })?;
        let total = source.len();
        info!(
            source = self.source_name,
            rendered = self.rendered_name,
            items = total,
            "Prerendering"
        );

        // Once one item fails the rest of this render's queued items are skipped.
        let failed = Arc::new(AtomicBool::new(false));
        let renders: Vec<_> = source
            .into_iter()
            .map(|(key, buffer)| {
                let render_one = self.render_one.clone();
                let failed = failed.clone();
                let rendered_name = self.rendered_name.clone();
                self.queue.enqueue(move || async move {
                    if failed.load(Ordering::SeqCst) {
                        return Err(Error::render_failure(
                            &rendered_name,
                            format!("{} skipped after an earlier failure", key),
                        ));
                    }
                    match render_one(key.clone(), buffer).await {
                        Ok(rendered) => Ok((key, rendered)),
                        Err(e) => {
                            failed.store(true, Ordering::SeqCst);
                            Err(match e {
                                Error::RenderFailure { .. } => e,
                                other => Error::render_failure(
                                    &rendered_name,
                                    format!("{}: {}", key, other),
                                ),
                            })
                        }
                    }
                })
            })
            .collect();

        let mut rendered = BTreeMap::new();
        for (index, render) in renders.into_iter().enumerate() {
            let (key, buffer) = render.await?;
            rendered.insert(key, buffer);
            self.report(index + 1, total);
        }
        if total == 0 {
            self.report(0, 0);
        }

        let source = SampleSource::from_buffers(&rendered)
            .map_err(|e| Error::render_failure(&self.rendered_name, e.to_string()))?;
        self.library.save(vec![(self.rendered_name.clone(), source)]);
        info!(
            rendered = self.rendered_name,
            samples = rendered.len(),
            "Prerender complete"
        );
        Ok(Arc::new(rendered))
    }
}

/// Memoizes rendered sample sets by name.
pub struct PrerenderCache {
    library: Arc<dyn SampleLibrary>,
    queue: RenderQueue,
    sample_rate: u32,
    in_flight: Registry,
}

impl PrerenderCache {
    /// Creates a cache that loads and saves through `library` and renders on `queue`.
    pub fn new(library: Arc<dyn SampleLibrary>, queue: RenderQueue, sample_rate: u32) -> Self {
        PrerenderCache {
            library,
            queue,
            sample_rate,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn queue(&self) -> &RenderQueue {
        &self.queue
    }

    pub fn library(&self) -> &Arc<dyn SampleLibrary> {
        &self.library
    }

    /// Number of renders currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Returns the set cached as `rendered_name`, rendering it from `source_name` with
    /// `render_one` if it hasn't been rendered yet.
    ///
    /// Progress goes to the caller that started the render; callers that join an
    /// in-flight render only receive its outcome. If any item fails the whole call fails
    /// and nothing is saved. Dropping the returned future does not stop the render.
    pub async fn get<F, Fut>(
        &self,
        source_name: &str,
        rendered_name: &str,
        render_one: F,
        progress: Option<ProgressFn>,
    ) -> Result<BufferSet, Error>
    where
        F: Fn(SampleKey, AudioBuffer) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<AudioBuffer, Error>> + Send + 'static,
    {
        let render_one: RenderFn = Arc::new(move |key, buffer| Box::pin(render_one(key, buffer)));
        let mut receiver = self.join_or_start(source_name, rendered_name, render_one, progress);

        let outcome = match receiver.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone(),
            Err(_) => None,
        };
        match outcome {
            Some(Ok(rendered)) => Ok(BufferSet::from_buffers((*rendered).clone())),
            Some(Err(e)) => Err(e),
            None => Err(Error::render_failure(
                rendered_name,
                "render ended without a result",
            )),
        }
    }

    fn join_or_start(
        &self,
        source_name: &str,
        rendered_name: &str,
        render_one: RenderFn,
        progress: Option<ProgressFn>,
    ) -> watch::Receiver<Outcome> {
        let mut in_flight = self.in_flight.lock();
        if let Some(receiver) = in_flight.get(rendered_name) {
            info!(rendered = rendered_name, "Joining in-flight prerender");
            return receiver.clone();
        }

        let (sender, receiver) = watch::channel(None);
        in_flight.insert(rendered_name.to_string(), receiver.clone());

        let guard = InFlightGuard {
            registry: self.in_flight.clone(),
            name: rendered_name.to_string(),
        };
        let prerender = Prerender {
            library: self.library.clone(),
            queue: self.queue.clone(),
            sample_rate: self.sample_rate,
            source_name: source_name.to_string(),
            rendered_name: rendered_name.to_string(),
            render_one,
            progress,
        };
        tokio::spawn(async move {
            let result = prerender.run().await;
            if let Err(e) = &result {
                error!(rendered = guard.name, err = %e, "Prerender failed");
            }
            drop(guard);
            let _ = sender.send(Some(result));
        });

        receiver
    }

    /// Renders a configured virtual instrument through its effect chain.
    pub async fn prerender_instrument(
        &self,
        instrument: &InstrumentDefinition,
        progress: Option<ProgressFn>,
    ) -> Result<BufferSet, Error> {
        let tail = instrument.tail()?.as_secs_f64();
        let specs = instrument.effects().to_vec();
        for spec in specs.iter() {
            effects::from_spec(spec, 1, self.sample_rate)?;
        }

        let name = instrument.name().to_string();
        self.get(
            instrument.source(),
            instrument.name(),
            move |_, buffer| {
                let specs = specs.clone();
                let name = name.clone();
                async move {
                    tokio::task::spawn_blocking(move || {
                        let chain = specs
                            .iter()
                            .map(|spec| {
                                effects::from_spec(
                                    spec,
                                    buffer.channel_count(),
                                    buffer.sample_rate(),
                                )
                            })
                            .collect::<Result<Vec<_>, ConfigError>>()?;
                        Ok::<_, Error>(offline::render_through(&buffer, chain, tail))
                    })
                    .await
                    .map_err(|e| Error::render_failure(&name, e))?
                }
            },
            progress,
        )
        .await
    }
}

impl std::fmt::Debug for PrerenderCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrerenderCache")
            .field("sample_rate", &self.sample_rate)
            .field("in_flight", &self.in_flight())
            .field("queue", &self.queue)
            .finish()
    }
}
