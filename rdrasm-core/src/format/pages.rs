use thiserror::Error;

/// Size of one code page. The code region is carved into 4 KiB pages whose
/// physical placement inside the decoded buffer is described by the
/// code-pages table in the script header.
pub const PAGE_SIZE: usize = 4096;

/// Low 24 bits of a pointer field. The top byte is a region/type tag and
/// never participates in offset computation.
pub const PTR_MASK: u32 = 0x00FF_FFFF;

/// Strip the region tag from a raw pointer field.
#[inline]
pub fn mask_ptr(p: u32) -> u32 {
    p & PTR_MASK
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("physical offset {0:#x} is outside the mapped code region")]
    OutOfRange(usize),
    #[error("page index {page} is not mapped ({pages} pages)")]
    UnknownPage { page: usize, pages: usize },
    #[error("offset {intra:#x} exceeds page {page} (length {len:#x})")]
    IntraOutOfRange { page: usize, intra: usize, len: usize },
}

/// Ordered mapping from page index to the page's base physical offset in
/// the decoded buffer. Built once from the script header's code-pages
/// table; read-only afterwards.
#[derive(Debug, Clone)]
pub struct PageMap {
    bases: Vec<usize>,
    code_size: usize,
}

impl PageMap {
    pub fn new(bases: Vec<usize>, code_size: usize) -> Self {
        Self { bases, code_size }
    }

    pub fn page_count(&self) -> usize {
        self.bases.len()
    }

    pub fn code_size(&self) -> usize {
        self.code_size
    }

    pub fn bases(&self) -> &[usize] {
        &self.bases
    }

    /// Number of code bytes held by `page`. Only the last page is short.
    pub fn page_len(&self, page: usize) -> Result<usize, AddressError> {
        if page >= self.bases.len() {
            return Err(AddressError::UnknownPage {
                page,
                pages: self.bases.len(),
            });
        }
        Ok(self.code_size.min((page + 1) * PAGE_SIZE) - page * PAGE_SIZE)
    }

    /// Translate a (page, intra-page offset) pair to a physical offset.
    pub fn resolve(&self, page: usize, intra: usize) -> Result<usize, AddressError> {
        let len = self.page_len(page)?;
        if intra >= len {
            return Err(AddressError::IntraOutOfRange { page, intra, len });
        }
        Ok(self.bases[page] + intra)
    }

    /// Translate a physical offset back to its (page, intra) pair.
    /// Exact inverse of [`resolve`](Self::resolve) inside the code region.
    pub fn locate(&self, physical: usize) -> Result<(usize, usize), AddressError> {
        for (page, &base) in self.bases.iter().enumerate() {
            let len = self.page_len(page)?;
            if physical >= base && physical < base + len {
                return Ok((page, physical - base));
            }
        }
        Err(AddressError::OutOfRange(physical))
    }

    /// Translate a virtual code-region offset to a physical offset.
    pub fn physical_of(&self, virtual_off: usize) -> Result<usize, AddressError> {
        self.resolve(virtual_off / PAGE_SIZE, virtual_off % PAGE_SIZE)
    }

    /// Assemble the code region into one contiguous image, in page order.
    pub fn code_image(&self, buffer: &[u8]) -> Result<Vec<u8>, AddressError> {
        let mut image = Vec::with_capacity(self.code_size);
        for (page, &base) in self.bases.iter().enumerate() {
            let len = self.page_len(page)?;
            if base + len > buffer.len() {
                return Err(AddressError::OutOfRange(base + len - 1));
            }
            image.extend_from_slice(&buffer[base..base + len]);
        }
        Ok(image)
    }

    /// Write a contiguous code image back into the buffer page by page.
    /// The image length must equal the code size.
    pub fn patch_image(&self, buffer: &mut [u8], image: &[u8]) -> Result<(), AddressError> {
        debug_assert_eq!(image.len(), self.code_size);
        let mut cursor = 0usize;
        for (page, &base) in self.bases.iter().enumerate() {
            let len = self.page_len(page)?;
            if base + len > buffer.len() {
                return Err(AddressError::OutOfRange(base + len - 1));
            }
            buffer[base..base + len].copy_from_slice(&image[cursor..cursor + len]);
            cursor += len;
        }
        Ok(())
    }
}
