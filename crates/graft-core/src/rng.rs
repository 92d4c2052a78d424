// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Counter-based RNG streams stored as graph state.
//!
//! A stream is an `RngStream` node holding a root seed ([`RNG_KEY`]) and a
//! counter ([`RNG_COUNT`]) as variables tagged with the stream name, so the
//! usual state and filter machinery can split them out. Derivation is a pure
//! function of `(seed, counter)`: replaying a stream from the same snapshot
//! reproduces the same keys.
//!
//! Key mixing uses domain-separated BLAKE3 hashes:
//! - seeding: `"rng:seed:" || len || seed_le`
//! - folding: `"rng:fold_in:" || len || key || len || data_le`
//! - splitting: `"rng:split:" || len || key || len || i_le`
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::api::iter_graph;
use crate::error::{GraftError, Result};
use crate::graph::{Graph, Slot};
use crate::ident::{domain_hash, Hash, NodeRef, VarRef};
use crate::math::Prng;
use crate::path::{Key, Path};
use crate::value::{Static, Value};
use crate::variable::{Variable, RNG_COUNT, RNG_KEY};

/// Node type name of a single stream.
pub const STREAM_TYPE: &str = "RngStream";
/// Node type name of a stream collection.
pub const RNGS_TYPE: &str = "Rngs";

const FIELD_TAG: &str = "tag";
const FIELD_KEY: &str = "key";
const FIELD_COUNT: &str = "count";

/// 256-bit key material.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct RngKey(pub Hash);

impl RngKey {
    /// Derives a root key from an integer seed.
    #[must_use]
    pub fn from_seed(seed: u64) -> Self {
        Self(domain_hash(b"rng:seed:", &[&seed.to_le_bytes()]))
    }

    /// Mixes `data` into this key.
    #[must_use]
    pub fn fold_in(&self, data: u64) -> Self {
        Self(domain_hash(b"rng:fold_in:", &[&self.0, &data.to_le_bytes()]))
    }

    /// Child `i` of a split; independent of [`RngKey::fold_in`] outputs.
    #[must_use]
    pub fn split_child(&self, i: u64) -> Self {
        Self(domain_hash(b"rng:split:", &[&self.0, &i.to_le_bytes()]))
    }

    /// `k` split children of this key.
    #[must_use]
    pub fn split(&self, k: usize) -> Vec<Self> {
        (0..k as u64).map(|i| self.split_child(i)).collect()
    }

    /// Sampling generator seeded by this key.
    #[must_use]
    pub fn prng(&self) -> Prng {
        Prng::from_key(self)
    }

    /// Lowercase hex form.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<u64> for RngKey {
    fn from(seed: u64) -> Self {
        Self::from_seed(seed)
    }
}

/// Snapshot of one stream: seed plus counter.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct StreamState {
    /// Root seed.
    pub key: RngKey,
    /// Number of derivations so far.
    pub count: u64,
}

/// Handle to an `RngStream` node.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RngStream {
    node: NodeRef,
}

impl RngStream {
    /// Allocates a stream node named `name` with counter zero.
    ///
    /// # Errors
    /// Propagates arena errors (none for a fresh node).
    pub fn new(graph: &mut Graph, name: &str, seed: impl Into<RngKey>) -> Result<Self> {
        let node = graph.object(STREAM_TYPE);
        let key = Variable::new(RNG_KEY, Value::Key(seed.into())).with_tag(name);
        let key = graph.add_variable(key);
        let count = graph.add_variable(Variable::new(RNG_COUNT, 0u64).with_tag(name));
        graph.set(node, FIELD_TAG, Static::from(name))?;
        graph.set(node, FIELD_KEY, key)?;
        graph.set(node, FIELD_COUNT, count)?;
        Ok(Self { node })
    }

    /// Wraps an existing node after checking its shape.
    ///
    /// # Errors
    /// [`GraftError::MalformedStream`] if `key` or `count` is missing.
    pub fn from_node(graph: &Graph, node: NodeRef) -> Result<Self> {
        let stream = Self { node };
        stream.state(graph)?;
        Ok(stream)
    }

    /// Underlying node.
    #[must_use]
    pub const fn node(&self) -> NodeRef {
        self.node
    }

    fn var(self, graph: &Graph, field: &str) -> Result<VarRef> {
        match graph.get(self.node, &Key::from(field))? {
            Some(Slot::Var(var)) => Ok(*var),
            _ => Err(GraftError::MalformedStream {
                path: Path::from([field]),
            }),
        }
    }

    /// Stream name stored in the `tag` field.
    ///
    /// # Errors
    /// [`GraftError::MalformedStream`] if the tag is missing.
    pub fn name(self, graph: &Graph) -> Result<String> {
        match graph.get(self.node, &Key::from(FIELD_TAG))? {
            Some(Slot::Static(Static::Str(name))) => Ok(name.clone()),
            _ => Err(GraftError::MalformedStream {
                path: Path::from([FIELD_TAG]),
            }),
        }
    }

    /// Current seed and counter.
    ///
    /// # Errors
    /// [`GraftError::MalformedStream`] if either variable is missing or holds
    /// the wrong kind of value.
    pub fn state(self, graph: &Graph) -> Result<StreamState> {
        let key = graph
            .variable(self.var(graph, FIELD_KEY)?)?
            .value()
            .as_key()
            .ok_or_else(|| GraftError::MalformedStream {
                path: Path::from([FIELD_KEY]),
            })?;
        let count = graph
            .variable(self.var(graph, FIELD_COUNT)?)?
            .value()
            .as_u64()
            .ok_or_else(|| GraftError::MalformedStream {
                path: Path::from([FIELD_COUNT]),
            })?;
        Ok(StreamState { key, count })
    }

    /// Returns `fold_in(seed, counter)` and advances the counter by one.
    ///
    /// # Errors
    /// [`GraftError::MalformedStream`], or [`GraftError::FrozenVariable`] if
    /// the counter is read-only.
    pub fn derive(self, graph: &mut Graph) -> Result<RngKey> {
        let state = self.state(graph)?;
        let derived = state.key.fold_in(state.count);
        let count = self.writable(graph, FIELD_COUNT)?;
        graph.set_value(count, state.count.wrapping_add(1))?;
        trace!(count = state.count, "derived rng key");
        Ok(derived)
    }

    /// Replaces the seed and zeroes the counter.
    ///
    /// # Errors
    /// [`GraftError::MalformedStream`] or [`GraftError::FrozenVariable`].
    pub fn reset(self, graph: &mut Graph, seed: impl Into<RngKey>) -> Result<()> {
        self.restore(
            graph,
            StreamState {
                key: seed.into(),
                count: 0,
            },
        )
    }

    /// Overwrites seed and counter from a snapshot.
    ///
    /// Both variables are checked before either is written, so a failed
    /// restore leaves the stream as it was.
    ///
    /// # Errors
    /// [`GraftError::MalformedStream`] or [`GraftError::FrozenVariable`].
    pub fn restore(self, graph: &mut Graph, state: StreamState) -> Result<()> {
        let (key, count) = self.check_restore(graph)?;
        graph.set_value(key, state.key)?;
        graph.set_value(count, state.count)
    }

    fn writable(self, graph: &Graph, field: &str) -> Result<VarRef> {
        let var = self.var(graph, field)?;
        if graph.variable(var)?.is_mutable() {
            Ok(var)
        } else {
            Err(GraftError::FrozenVariable(var))
        }
    }

    fn check_restore(self, graph: &Graph) -> Result<(VarRef, VarRef)> {
        Ok((
            self.writable(graph, FIELD_KEY)?,
            self.writable(graph, FIELD_COUNT)?,
        ))
    }

    fn check_derive(self, graph: &Graph) -> Result<()> {
        self.state(graph)?;
        self.writable(graph, FIELD_COUNT)?;
        Ok(())
    }

    /// Advances this stream once and returns `k` child snapshots seeded from
    /// that single derivation, each with counter zero.
    ///
    /// # Errors
    /// Same as [`RngStream::derive`].
    pub fn split(self, graph: &mut Graph, k: usize) -> Result<Vec<StreamState>> {
        let base = self.derive(graph)?;
        Ok(base
            .split(k)
            .into_iter()
            .map(|key| StreamState { key, count: 0 })
            .collect())
    }

    /// Derives a key and returns a generator seeded by it.
    ///
    /// # Errors
    /// Same as [`RngStream::derive`].
    pub fn prng(self, graph: &mut Graph) -> Result<Prng> {
        Ok(self.derive(graph)?.prng())
    }
}

/// Handle to an `Rngs` node: named streams keyed by field name.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Rngs {
    node: NodeRef,
}

impl Rngs {
    /// Allocates an `Rngs` node with one stream per `(name, seed)`.
    ///
    /// # Errors
    /// Arena errors propagate.
    pub fn new<I, S, K>(graph: &mut Graph, streams: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, K)>,
        S: AsRef<str>,
        K: Into<RngKey>,
    {
        let node = graph.object(RNGS_TYPE);
        for (name, seed) in streams {
            let stream = RngStream::new(graph, name.as_ref(), seed)?;
            graph.set(node, name.as_ref(), stream.node())?;
        }
        Ok(Self { node })
    }

    /// Wraps an existing `Rngs` node.
    ///
    /// # Errors
    /// [`GraftError::UnknownNode`] for a foreign handle.
    pub fn from_node(graph: &Graph, node: NodeRef) -> Result<Self> {
        graph.node(node)?;
        Ok(Self { node })
    }

    /// Underlying node.
    #[must_use]
    pub const fn node(&self) -> NodeRef {
        self.node
    }

    /// Looks up `name`, falling back to the configured default stream.
    ///
    /// # Errors
    /// [`GraftError::UnknownStream`] when neither exists.
    pub fn stream(self, graph: &Graph, name: &str) -> Result<RngStream> {
        let node = graph.node(self.node)?;
        let fallback = graph.config().default_stream.as_str();
        for candidate in [name, fallback] {
            if let Some(Slot::Node(stream)) = node.get(&Key::from(candidate)) {
                if candidate != name {
                    trace!(requested = name, fallback, "rng stream fallback");
                }
                return RngStream::from_node(graph, *stream);
            }
        }
        Err(GraftError::UnknownStream(name.to_owned()))
    }

    /// Derives a key from stream `name` (or the default stream).
    ///
    /// # Errors
    /// [`GraftError::UnknownStream`] or stream errors.
    pub fn derive(self, graph: &mut Graph, name: &str) -> Result<RngKey> {
        self.stream(graph, name)?.derive(graph)
    }

    /// All streams in field order.
    ///
    /// # Errors
    /// [`GraftError::MalformedStream`] if a child node is not a stream.
    pub fn streams(self, graph: &Graph) -> Result<Vec<(String, RngStream)>> {
        let mut out = Vec::new();
        for (key, slot) in graph.node(self.node)?.fields() {
            if let Slot::Node(stream) = slot {
                let name = key.to_string();
                out.push((name, RngStream::from_node(graph, *stream)?));
            }
        }
        Ok(out)
    }

    /// Snapshot of every stream.
    ///
    /// # Errors
    /// Same as [`Rngs::streams`].
    pub fn snapshot(self, graph: &Graph) -> Result<Vec<(String, StreamState)>> {
        self.streams(graph)?
            .into_iter()
            .map(|(name, stream)| Ok((name, stream.state(graph)?)))
            .collect()
    }

    /// Restores streams by name; names not present here are ignored.
    ///
    /// Every targeted stream is checked before any is written.
    ///
    /// # Errors
    /// Stream errors propagate; no stream changes in that case.
    pub fn restore(self, graph: &mut Graph, states: &[(String, StreamState)]) -> Result<()> {
        let mut targets = Vec::new();
        for (name, stream) in self.streams(graph)? {
            if let Some((_, state)) = states.iter().find(|(n, _)| *n == name) {
                stream.check_restore(graph)?;
                targets.push((stream, *state));
            }
        }
        for (stream, state) in targets {
            stream.restore(graph, state)?;
        }
        Ok(())
    }

    /// Splits every stream once into `k` children and returns, per replica,
    /// the snapshots to restore.
    ///
    /// # Errors
    /// Stream errors propagate; no stream advances in that case.
    pub fn split(self, graph: &mut Graph, k: usize) -> Result<Vec<Vec<(String, StreamState)>>> {
        let streams = self.streams(graph)?;
        for (_, stream) in &streams {
            stream.check_derive(graph)?;
        }
        let mut replicas = vec![Vec::new(); k];
        for (name, stream) in streams {
            for (replica, state) in replicas.iter_mut().zip(stream.split(graph, k)?) {
                replica.push((name.clone(), state));
            }
        }
        Ok(replicas)
    }

    /// Builds `k` replicas of the graph rooted at `root`, each with its
    /// streams split from this collection.
    ///
    /// Every parent stream advances exactly once. The `Rngs` node must be
    /// reachable from `root`.
    ///
    /// # Errors
    /// [`GraftError::PathNotFound`] if this node is not reachable from
    /// `root`; stream and merge errors propagate.
    pub fn fork(self, graph: &mut Graph, root: NodeRef, k: usize) -> Result<Vec<(Graph, NodeRef)>> {
        let location = iter_graph(graph, root)?
            .into_iter()
            .find_map(|(path, slot)| match slot {
                Slot::Node(node) if node == self.node => Some(path),
                _ => None,
            })
            .ok_or_else(|| GraftError::PathNotFound { path: Path::root() })?;
        let replicas = self.split(graph, k)?;
        let mut out = Vec::with_capacity(k);
        for states in replicas {
            let (mut copy, copy_root) = crate::api::clone_graph(graph, root)?;
            let rngs_node = if location.is_empty() {
                copy_root
            } else {
                match copy.lookup(copy_root, &location)? {
                    Slot::Node(node) => *node,
                    _ => return Err(GraftError::PathNotFound { path: location }),
                }
            };
            Self { node: rngs_node }.restore(&mut copy, &states)?;
            out.push((copy, copy_root));
        }
        debug!(replicas = k, at = %location, "forked graph");
        Ok(out)
    }
}
