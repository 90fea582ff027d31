//! Property tests for the static heap and mailboxes

use baremetal_kal::{Heap, HeapBlock, HeapError, Mailbox, MailboxError};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Alloc(usize),
    Free(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1usize..700).prop_map(Op::Alloc),
        2 => any::<usize>().prop_map(Op::Free),
    ]
}

proptest! {
    #[test]
    fn used_never_exceeds_heap_and_chain_stays_coalesced(
        ops in proptest::collection::vec(op(), 1..120),
    ) {
        let mut buf = vec![0u8; 8192];
        let mut heap = Heap::with_buffer(&mut buf).unwrap();
        let heap_size = heap.stats(false).heap_size;
        let mut live: Vec<HeapBlock> = Vec::new();

        for op in ops {
            match op {
                Op::Alloc(size) => match heap.allocate(size) {
                    Ok(block) => {
                        prop_assert!(heap.block_size(&block).unwrap() >= size);
                        live.push(block);
                    }
                    Err(err) => {
                        prop_assert_eq!(err, HeapError::OutOfMemory { requested: size });
                    }
                },
                Op::Free(pick) => {
                    if !live.is_empty() {
                        let block = live.swap_remove(pick % live.len());
                        heap.free(block);
                    }
                }
            }
            let stats = heap.stats(true);
            prop_assert!(stats.used <= heap_size);
            prop_assert!(stats.used <= stats.peak_used);
            prop_assert_eq!(heap.check_integrity(), Ok(()));
        }

        for block in live.drain(..) {
            heap.free(block);
        }
        let stats = heap.stats(true);
        prop_assert_eq!(stats.used, 0);
        prop_assert_eq!(stats.fragments.unwrap().free_count, 1);
    }

    #[test]
    fn reallocating_no_larger_keeps_peak(
        first in 1usize..2000,
        shrink in 0usize..2000,
    ) {
        let mut buf = vec![0u8; 4096];
        let mut heap = Heap::with_buffer(&mut buf).unwrap();
        let block = heap.allocate(first).unwrap();
        let peak = heap.stats(false).peak_used;
        heap.free(block);

        let second = first.saturating_sub(shrink).max(1);
        let again = heap.allocate(second).unwrap();
        prop_assert_eq!(heap.stats(false).peak_used, peak);
        heap.free(again);
    }

    #[test]
    fn mailbox_is_bounded_fifo(
        capacity in 1usize..16,
        slot_size in 1usize..32,
        extra in 1usize..4,
    ) {
        let mut buf = vec![0u8; 4096];
        let mut heap = Heap::with_buffer(&mut buf).unwrap();
        let mb = Mailbox::create(&mut heap, capacity, slot_size).unwrap();

        let item = |i: usize| vec![i as u8; slot_size];
        for i in 0..capacity {
            prop_assert!(mb.post(&mut heap, &item(i)).is_ok());
        }
        for _ in 0..extra {
            prop_assert_eq!(mb.post(&mut heap, &item(0xFF)), Err(MailboxError::Full));
            prop_assert_eq!(mb.len(&heap), capacity);
        }

        let mut out = vec![0u8; slot_size];
        for i in 0..capacity {
            prop_assert!(mb.try_take(&mut heap, &mut out).is_ok());
            prop_assert_eq!(&out, &item(i));
        }
        prop_assert_eq!(mb.try_take(&mut heap, &mut out), Err(MailboxError::Empty));
        prop_assert_eq!(mb.len(&heap), 0);

        mb.destroy(&mut heap);
        prop_assert_eq!(heap.used_units(), 0);
    }

    #[test]
    fn destroy_drains_every_occupied_slot(
        capacity in 1usize..12,
        posted in 0usize..12,
        taken in 0usize..12,
    ) {
        let posted = posted.min(capacity);
        let taken = taken.min(posted);
        let mut buf = vec![0u8; 2048];
        let mut heap = Heap::with_buffer(&mut buf).unwrap();
        let mb = Mailbox::create(&mut heap, capacity, 1).unwrap();

        for i in 0..posted {
            mb.post(&mut heap, &[i as u8]).unwrap();
        }
        let mut out = [0u8; 1];
        for _ in 0..taken {
            mb.try_take(&mut heap, &mut out).unwrap();
        }

        let mut seen = Vec::new();
        let delivered = mb.destroy_with(&mut heap, |item| seen.push(item[0]));
        let expected: Vec<u8> = (taken..posted).map(|i| i as u8).collect();
        prop_assert_eq!(delivered, posted - taken);
        prop_assert_eq!(seen, expected);
        prop_assert_eq!(heap.used_units(), 0);
    }
}
