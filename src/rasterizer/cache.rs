//! Per-draw vertex cache
//!
//! Memoizes shaded vertices by source index so vertices shared between
//! triangles of a list/strip/fan run the vertex shader once. When full, the
//! least recently fetched entry is replaced.

use super::error::Result;
use super::shader::VsOutput;
use super::types::VERTEX_CACHE_SIZE;

#[derive(Debug, Clone)]
struct CacheEntry {
    index: u32,
    /// Value of the fetch counter when this entry was last touched
    tick: u64,
    output: VsOutput,
}

#[derive(Debug)]
pub struct VertexCache {
    entries: Vec<CacheEntry>,
    capacity: usize,
    last_touched: Option<usize>,
    tick: u64,
    hits: u64,
    misses: u64,
}

impl Default for VertexCache {
    fn default() -> Self {
        Self::new(VERTEX_CACHE_SIZE)
    }
}

impl VertexCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
            last_touched: None,
            tick: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Forget everything; called at the start of every draw
    pub fn reset(&mut self) {
        self.entries.clear();
        self.last_touched = None;
        self.tick = 0;
        self.hits = 0;
        self.misses = 0;
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, index: u32) -> bool {
        self.entries.iter().any(|e| e.index == index)
    }

    /// Return the shaded vertex `index`, calling `shade` (decode + vertex
    /// shader) only on a miss.
    pub fn fetch<F>(&mut self, index: u32, shade: F) -> Result<VsOutput>
    where
        F: FnOnce(u32) -> Result<VsOutput>,
    {
        self.tick += 1;

        let hit = match self.last_touched {
            Some(slot) if self.entries[slot].index == index => Some(slot),
            _ => self.entries.iter().position(|e| e.index == index),
        };
        if let Some(slot) = hit {
            self.hits += 1;
            let entry = &mut self.entries[slot];
            entry.tick = self.tick;
            self.last_touched = Some(slot);
            return Ok(entry.output);
        }

        self.misses += 1;
        let output = shade(index)?;
        let entry = CacheEntry { index, tick: self.tick, output };
        let slot = if self.entries.len() < self.capacity {
            self.entries.push(entry);
            self.entries.len() - 1
        } else {
            let oldest = self.entries.iter()
                .enumerate()
                .min_by_key(|(_, e)| e.tick)
                .map(|(i, _)| i)
                .unwrap_or(0);
            self.entries[oldest] = entry;
            oldest
        };
        self.last_touched = Some(slot);
        Ok(output)
    }
}
