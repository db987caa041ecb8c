use windy_buddy::{
    pages_per_block, BuddyAllocator, Error, FrameTranslator, LinearMap, PageDescriptor, PageId,
    Pfn,
};

const ORDERS: usize = 5;

type Buddy<'a, T> = BuddyAllocator<'a, T, ORDERS>;

/// A translator backed by an explicit table, so frame numbers are not
/// derived from the same arithmetic the allocator uses.
struct Table {
    frames: Vec<usize>,
}

impl Table {
    fn new(base: usize, count: usize) -> Self {
        Self {
            frames: (base..base + count).collect(),
        }
    }
}

impl FrameTranslator for Table {
    fn frame_of(&self, page: PageId) -> Pfn {
        Pfn(self.frames[page.index()])
    }

    fn page_of(&self, pfn: Pfn) -> PageId {
        match self.frames.iter().position(|&frame| frame == pfn.0) {
            Some(idx) => PageId(idx),
            None => PageId(usize::MAX),
        }
    }
}

struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn below(&mut self, bound: usize) -> usize {
        (self.next() % bound as u64) as usize
    }
}

fn snapshot<T: FrameTranslator>(alloc: &Buddy<'_, T>) -> Vec<Vec<usize>> {
    (0..ORDERS)
        .map(|order| alloc.free_list(order).map(PageId::index).collect())
        .collect()
}

/// Checks alignment, sort order and disjointness of all free lists and
/// returns the number of free pages.
fn check_invariants<T: FrameTranslator>(alloc: &Buddy<'_, T>, total: usize) -> usize {
    let mut owner = vec![false; total];
    let mut free = 0;

    for order in 0..ORDERS {
        let blocks = alloc.free_list(order).collect::<Vec<_>>();
        assert!(
            blocks.windows(2).all(|pair| pair[0] < pair[1]),
            "order {} is not sorted: {:?}",
            order,
            blocks
        );

        for block in blocks {
            assert!(alloc.is_aligned(block, order));
            for page in block.index()..block.index() + pages_per_block(order) {
                assert!(!owner[page], "page {} is in two free blocks", page);
                owner[page] = true;
            }
            free += pages_per_block(order);
        }
    }

    assert_eq!(free, alloc.stats().free);
    free
}

#[test]
fn eight_page_walkthrough() {
    let mut pages = [PageDescriptor::EMPTY; 8];
    let mut alloc = BuddyAllocator::<LinearMap, 4>::new(LinearMap::new(Pfn(0)));
    alloc.init(&mut pages).unwrap();

    let initial = alloc.dump().to_string();
    assert_eq!(initial, "BUDDY STATE:\n[0]\n[1]\n[2]\n[3] 0\n");

    let page = alloc.alloc(0).unwrap();
    assert_eq!(page, PageId(0));
    assert_eq!(
        alloc.dump().to_string(),
        "BUDDY STATE:\n[0] 1\n[1] 2\n[2] 4\n[3]\n"
    );

    alloc.free(page, 0);
    assert_eq!(alloc.dump().to_string(), initial);
}

#[test]
fn alloc_then_free_restores_every_list() {
    let mut pages = vec![PageDescriptor::EMPTY; 45];
    let mut alloc = Buddy::new(LinearMap::new(Pfn(0)));
    alloc.init(&mut pages).unwrap();

    // fragment the allocator a little first
    let kept = [alloc.alloc(0).unwrap(), alloc.alloc(2).unwrap()];

    for order in 0..ORDERS {
        let before = snapshot(&alloc);
        match alloc.alloc(order) {
            Ok(block) => {
                alloc.free(block, order);
                assert_eq!(snapshot(&alloc), before, "order {}", order);
            }
            Err(err) => assert_eq!(err, Error::NoMemoryAvailable),
        }
    }

    alloc.free(kept[1], 2);
    alloc.free(kept[0], 0);
    check_invariants(&alloc, 45);
}

#[test]
fn random_operations_keep_invariants() {
    const TOTAL: usize = 100;

    let mut pages = vec![PageDescriptor::EMPTY; TOTAL];
    let mut alloc = Buddy::new(Table::new(0x40, TOTAL));
    alloc.init(&mut pages).unwrap();

    let mut rng = XorShift(0x2545_f491_4f6c_dd1d);
    let mut allocated: Vec<(PageId, usize)> = Vec::new();
    let mut reserved: Vec<PageId> = Vec::new();

    for _ in 0..2_000 {
        match rng.below(10) {
            0..=4 => {
                let order = rng.below(ORDERS);
                if let Ok(block) = alloc.alloc(order) {
                    assert!(alloc.is_aligned(block, order));
                    assert!(!reserved.contains(&block));
                    allocated.push((block, order));
                }
            }
            5..=7 if !allocated.is_empty() => {
                let (block, order) = allocated.swap_remove(rng.below(allocated.len()));
                alloc.free(block, order);
            }
            8 => {
                let page = PageId(rng.below(TOTAL));
                let was_free = alloc.is_free(page);
                assert_eq!(alloc.reserve(page).is_ok(), was_free);
                if was_free {
                    reserved.push(page);
                    assert_eq!(alloc.reserve(page), Err(Error::PageNotFree));
                }
            }
            _ if !reserved.is_empty() => {
                let page = reserved.swap_remove(rng.below(reserved.len()));
                alloc.unreserve(page).unwrap();
            }
            _ => {}
        }

        let in_use = allocated
            .iter()
            .map(|&(_, order)| pages_per_block(order))
            .sum::<usize>();
        let free = check_invariants(&alloc, TOTAL);
        assert_eq!(free, TOTAL - in_use - reserved.len());
        assert_eq!(alloc.stats().reserved, reserved.len());
    }

    for (block, order) in allocated.drain(..) {
        alloc.free(block, order);
    }
    for page in reserved.drain(..) {
        alloc.unreserve(page).unwrap();
    }

    // everything coalesced back into the blocks `init` created
    let mut fresh_pages = vec![PageDescriptor::EMPTY; TOTAL];
    let mut fresh = Buddy::new(Table::new(0x40, TOTAL));
    fresh.init(&mut fresh_pages).unwrap();
    assert_eq!(snapshot(&alloc), snapshot(&fresh));
}

#[test]
fn buddies_coalesce_regardless_of_free_order() {
    for lower_first in [true, false] {
        let mut pages = [PageDescriptor::EMPTY; 16];
        let mut alloc = Buddy::new(LinearMap::new(Pfn(0)));
        alloc.init(&mut pages).unwrap();

        let lower = alloc.alloc(1).unwrap();
        let upper = alloc.alloc(1).unwrap();
        let other = alloc.alloc(2).unwrap();
        assert_eq!((lower, upper, other), (PageId(0), PageId(2), PageId(4)));

        if lower_first {
            alloc.free(lower, 1);
            alloc.free(upper, 1);
        } else {
            alloc.free(upper, 1);
            alloc.free(lower, 1);
        }

        assert_eq!(alloc.free_list(1).count(), 0);
        assert_eq!(alloc.free_list(2).collect::<Vec<_>>(), [PageId(0)]);
    }
}

#[test]
fn reserved_page_stays_out_of_allocations() {
    let mut pages = [PageDescriptor::EMPTY; 16];
    let mut alloc = Buddy::new(LinearMap::new(Pfn(0)));
    alloc.init(&mut pages).unwrap();

    alloc.reserve(PageId(9)).unwrap();
    assert_eq!(alloc.reserve(PageId(9)), Err(Error::PageNotFree));

    let mut handed_out = Vec::new();
    while let Ok(page) = alloc.alloc(0) {
        handed_out.push(page);
    }

    assert_eq!(handed_out.len(), 15);
    assert!(!handed_out.contains(&PageId(9)));
}
