use pipein_core::{BindingMode, ChannelProvisioner, OversizePolicy};
use proptest::prelude::*;
use std::io::Read;

// Smallest default pipe capacity among supported platforms.
const SMALL_PIPE: usize = 16 * 1024;

fn deliver(data: &[u8]) -> (usize, Vec<u8>) {
    let mut provisioner = ChannelProvisioner::new(BindingMode::Threaded, OversizePolicy::Truncate);
    let mut iteration = provisioner.scoped(data).unwrap();
    let delivered = iteration.prepared().delivered;
    let seen = iteration.invoke(|stdin| {
        let mut out = Vec::new();
        stdin.read_to_end(&mut out).unwrap();
        out
    });
    (delivered, seen)
}

proptest! {
    /// Anything that fits in the pipe is observed byte for byte.
    #[test]
    fn prop_small_buffers_arrive_unchanged(data in proptest::collection::vec(any::<u8>(), 0..=SMALL_PIPE)) {
        let (delivered, seen) = deliver(&data);
        prop_assert_eq!(delivered, data.len());
        prop_assert_eq!(seen, data);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// Oversized buffers show up as an exact prefix, never reordered or padded.
    #[test]
    fn prop_oversized_buffers_arrive_as_prefix(
        seed in any::<u8>(),
        len in (2 * 1024 * 1024usize)..(3 * 1024 * 1024usize),
    ) {
        let data: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect();
        let (delivered, seen) = deliver(&data);
        prop_assert!(delivered < data.len());
        prop_assert_eq!(seen.len(), delivered);
        prop_assert_eq!(&seen[..], &data[..delivered]);
    }
}
