use fnv::FnvHashMap;

use crate::error::{Error, Result};
use crate::Vma;

/// One contiguous span of loadable bytes, as the section cache sees it.
///
/// Grounded on `section_from_vma`/`vma_in_section` in the original
/// `mem_manager.c`: a span is identified purely by its base address and
/// size, independent of whatever backend produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionSpan {
    pub base_vma: Vma,
    pub size: u64,
}

impl SectionSpan {
    /// Returns `true` if `vma` falls inside this span.
    pub fn contains(&self, vma: Vma) -> bool {
        vma >= self.base_vma && vma < self.base_vma.saturating_add(self.size)
    }
}

/// The boundary between the CFG engine and whatever supplies section bytes.
///
/// Implemented by the real ELF-backed object file in [`crate::binfile`] and,
/// in tests, by a trivial single-span fake so the disassembler driver and
/// CFG builder can be exercised without shipping real ELF fixtures.
pub trait SectionSource {
    /// Lists every loadable span in file order. Computed once when the
    /// target is opened and treated as immutable afterwards.
    fn spans(&self) -> &[SectionSpan];

    /// Reads the full contents of the span whose base address is
    /// `base_vma`. Called at most once per span by the cache; failures are
    /// not retried.
    fn read_span(&self, base_vma: Vma) -> Result<Vec<u8>>;
}

/// Lazily-loaded, VMA-keyed cache of section byte buffers.
///
/// Sections are loaded whole rather than per-instruction, mirroring
/// `load_section`/`load_section_for_vma` in the original `mem_manager.c`:
/// disassembly within a section is sequential, and object files contain few
/// sections, so amortising the read over the whole buffer is cheap and
/// simple.
#[derive(Debug, Default)]
pub struct SectionCache {
    buffers: FnvHashMap<Vma, Vec<u8>>,
}

impl SectionCache {
    pub fn new() -> Self {
        SectionCache {
            buffers: FnvHashMap::default(),
        }
    }

    /// Finds the span covering `vma`, loading and caching its bytes if this
    /// is the first request for that span, then returns the byte slice
    /// corresponding to `vma` onward within the loaded buffer.
    pub fn load_for_vma<'a, S: SectionSource>(
        &'a mut self,
        source: &S,
        vma: Vma,
    ) -> Result<&'a [u8]> {
        let span = source
            .spans()
            .iter()
            .find(|s| s.contains(vma))
            .ok_or(Error::SectionNotFound(vma))?;
        if !self.buffers.contains_key(&span.base_vma) {
            let bytes = source.read_span(span.base_vma)?;
            self.buffers.insert(span.base_vma, bytes);
        }
        let buf = self.buffers.get(&span.base_vma).expect("just inserted");
        let offset = (vma - span.base_vma) as usize;
        Ok(&buf[offset..])
    }

    /// Drops every cached buffer, freeing their storage. Called exactly
    /// once at bin-file close.
    pub fn unload_all(&mut self) {
        self.buffers.clear();
    }
}

#[cfg(test)]
pub(crate) struct FlatImage {
    span: SectionSpan,
    bytes: Vec<u8>,
}

#[cfg(test)]
impl FlatImage {
    pub(crate) fn new(base_vma: Vma, bytes: Vec<u8>) -> Self {
        FlatImage {
            span: SectionSpan {
                base_vma,
                size: bytes.len() as u64,
            },
            bytes,
        }
    }
}

#[cfg(test)]
impl SectionSource for FlatImage {
    fn spans(&self) -> &[SectionSpan] {
        std::slice::from_ref(&self.span)
    }

    fn read_span(&self, base_vma: Vma) -> Result<Vec<u8>> {
        assert_eq!(base_vma, self.span.base_vma);
        Ok(self.bytes.clone())
    }
}
