/// Generational handle into a render surface slot.
///
/// A slot index may be reused after its handle is destroyed; the generation
/// distinguishes the new occupant from stale handles still held elsewhere.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(u32, u32); // (index, generation)

impl Handle {
    pub fn new(index: u32, generation: u32) -> Self {
        Handle(index, generation)
    }

    pub fn index(&self) -> u32 {
        self.0
    }

    pub fn generation(&self) -> u32 {
        self.1
    }
}

#[cfg(test)]
mod tests {
    use super::Handle;

    #[test]
    fn generation_distinguishes_reused_slots() {
        let a = Handle::new(3, 0);
        let b = Handle::new(3, 1);
        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
    }
}
