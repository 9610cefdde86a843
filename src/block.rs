//! Word-level boundary-tag primitives.
//!
//! Every block is bounded by a header word and an identical footer word
//! holding `size | alloc`. `bp` always names a payload address; the header
//! sits one word below it. Sizes include both tags, so a block can be
//! stepped over in either direction given only its boundary words.

pub(crate) const WORD: usize = core::mem::size_of::<usize>();
pub(crate) const DWORD: usize = 2 * WORD;

/// Smallest legal block: header, two free-list link words, footer.
pub(crate) const MIN_BLOCK: usize = 4 * WORD;

const ALLOC_BIT: usize = 1;
const SIZE_MASK: usize = !(WORD - 1);

/// Round `n` up to a whole number of words.
#[inline]
pub(crate) const fn align_word(n: usize) -> usize {
    (n + (WORD - 1)) & !(WORD - 1)
}

/// Pack a block size and allocation bit into a tag word.
#[inline]
pub(crate) const fn pack(size: usize, alloc: bool) -> usize {
    size | alloc as usize
}

#[inline]
pub(crate) const fn word_size(word: usize) -> usize {
    word & SIZE_MASK
}

#[inline]
pub(crate) const fn word_alloc(word: usize) -> bool {
    word & ALLOC_BIT != 0
}

/// Read the word at `p`.
///
/// ### Safety:
/// `p` must be a word-aligned address within the heap.
#[inline]
pub(crate) unsafe fn get(p: *mut u8) -> usize {
    p.cast::<usize>().read()
}

/// Write the word at `p`.
///
/// ### Safety:
/// `p` must be a word-aligned address within the heap.
#[inline]
pub(crate) unsafe fn put(p: *mut u8, word: usize) {
    p.cast::<usize>().write(word);
}

/// Header address of the block whose payload is `bp`.
#[inline]
pub(crate) unsafe fn header(bp: *mut u8) -> *mut u8 {
    bp.sub(WORD)
}

/// Size of the block at `bp`, tags included.
#[inline]
pub(crate) unsafe fn block_size(bp: *mut u8) -> usize {
    word_size(get(header(bp)))
}

#[inline]
pub(crate) unsafe fn block_alloc(bp: *mut u8) -> bool {
    word_alloc(get(header(bp)))
}

/// Footer address of the block at `bp`.
#[inline]
pub(crate) unsafe fn footer(bp: *mut u8) -> *mut u8 {
    bp.add(block_size(bp)).sub(DWORD)
}

/// Payload address of the block following `bp`.
#[inline]
pub(crate) unsafe fn next_block(bp: *mut u8) -> *mut u8 {
    bp.add(block_size(bp))
}

/// Payload address of the block preceding `bp`. Valid wherever the
/// preceding footer exists, which is everywhere right of the prologue.
#[inline]
pub(crate) unsafe fn prev_block(bp: *mut u8) -> *mut u8 {
    bp.sub(word_size(get(bp.sub(DWORD))))
}

/// Write both boundary tags of the block at `bp`.
#[inline]
pub(crate) unsafe fn set_tags(bp: *mut u8, size: usize, alloc: bool) {
    put(header(bp), pack(size, alloc));
    put(bp.add(size).sub(DWORD), pack(size, alloc));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_words() {
        assert_eq!(word_size(pack(96, true)), 96);
        assert!(word_alloc(pack(96, true)));
        assert!(!word_alloc(pack(96, false)));

        assert_eq!(align_word(0), 0);
        assert_eq!(align_word(1), WORD);
        assert_eq!(align_word(WORD), WORD);
        assert_eq!(align_word(WORD + 1), DWORD);
    }

    #[test]
    fn navigation() {
        let mut words = [0usize; 16];
        let base = words.as_mut_ptr().cast::<u8>();

        unsafe {
            // two adjacent four-word blocks
            let a = base.add(WORD);
            set_tags(a, 4 * WORD, true);
            let b = next_block(a);
            set_tags(b, 4 * WORD, false);

            assert_eq!(b, base.add(5 * WORD));
            assert_eq!(block_size(a), 4 * WORD);
            assert!(block_alloc(a));
            assert!(!block_alloc(b));
            assert_eq!(prev_block(b), a);
            assert_eq!(get(header(a)), get(footer(a)));
            assert_eq!(footer(b), base.add(7 * WORD));
        }
    }
}
