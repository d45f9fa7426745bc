//! Receive-side reorder window for best-effort channels.
//!
//! Tolerates out-of-order arrival within a bounded window without
//! unbounded memory growth. Output sequences are strictly increasing:
//! duplicates and late packets below the window are dropped, and a gap
//! that stays open past the window is skipped and counted as loss —
//! best-effort channels never request retransmission.

use std::collections::BTreeMap;

/// Reorder buffer generic over the buffered item.
pub struct ReorderWindow<T> {
    window: u32,
    /// Next sequence to deliver. First expected sequence is 1.
    next: u32,
    buffered: BTreeMap<u32, T>,
    delivered: u64,
    lost: u64,
    duplicates: u64,
}

impl<T> ReorderWindow<T> {
    pub fn new(window: u32) -> Self {
        Self {
            window: window.max(1),
            next: 1,
            buffered: BTreeMap::new(),
            delivered: 0,
            lost: 0,
            duplicates: 0,
        }
    }

    /// Offer a received packet. Returns every packet that became
    /// deliverable, in strictly increasing sequence order.
    pub fn push(&mut self, sequence: u32, item: T) -> Vec<(u32, T)> {
        if sequence < self.next || self.buffered.contains_key(&sequence) {
            // Below the window's lower bound, or a duplicate.
            self.duplicates += 1;
            return Vec::new();
        }
        self.buffered.insert(sequence, item);

        let mut out = Vec::new();
        self.drain_run(&mut out);

        // If a gap has pushed the buffered span past the window, skip
        // the gap: count the missing sequences as lost and resume at the
        // lowest buffered packet.
        while self.span() > self.window {
            if let Some(&lowest) = self.buffered.keys().next() {
                self.lost += (lowest - self.next) as u64;
                self.next = lowest;
                self.drain_run(&mut out);
            } else {
                break;
            }
        }

        self.delivered += out.len() as u64;
        out
    }

    /// Deliver everything still buffered, in order, counting skipped
    /// gaps as lost. Used at teardown.
    pub fn drain(&mut self) -> Vec<(u32, T)> {
        let mut out = Vec::new();
        while let Some(&lowest) = self.buffered.keys().next() {
            self.lost += (lowest - self.next) as u64;
            self.next = lowest;
            self.drain_run(&mut out);
        }
        self.delivered += out.len() as u64;
        out
    }

    /// Packets delivered in order so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Sequences skipped as lost.
    pub fn lost(&self) -> u64 {
        self.lost
    }

    /// Duplicates and below-window packets dropped.
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    // ── Internal ─────────────────────────────────────────────────

    fn drain_run(&mut self, out: &mut Vec<(u32, T)>) {
        while let Some(item) = self.buffered.remove(&self.next) {
            out.push((self.next, item));
            self.next = self.next.wrapping_add(1);
        }
    }

    /// Distance from the next expected sequence to the highest buffered
    /// one, inclusive. Zero when empty.
    fn span(&self) -> u32 {
        match self.buffered.keys().next_back() {
            Some(&highest) => highest - self.next + 1,
            None => 0,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn seqs(out: &[(u32, u32)]) -> Vec<u32> {
        out.iter().map(|&(s, _)| s).collect()
    }

    #[test]
    fn in_order_stream_passes_through() {
        let mut win = ReorderWindow::new(16);
        for seq in 1..=5u32 {
            let out = win.push(seq, seq);
            assert_eq!(seqs(&out), vec![seq]);
        }
        assert_eq!(win.delivered(), 5);
        assert_eq!(win.lost(), 0);
    }

    #[test]
    fn out_of_order_within_window_is_corrected() {
        let mut win = ReorderWindow::new(16);
        assert_eq!(seqs(&win.push(1, 1)), vec![1]);
        assert!(win.push(3, 3).is_empty());
        // 2 arrives late: both 2 and 3 become deliverable, in order.
        assert_eq!(seqs(&win.push(2, 2)), vec![2, 3]);
    }

    #[test]
    fn duplicates_are_rejected() {
        let mut win = ReorderWindow::new(16);
        let _ = win.push(1, 1);
        assert!(win.push(1, 1).is_empty());
        assert_eq!(win.duplicates(), 1);

        // Buffered (not yet delivered) duplicates too.
        let _ = win.push(5, 5);
        assert!(win.push(5, 5).is_empty());
        assert_eq!(win.duplicates(), 2);
    }

    #[test]
    fn persistent_gap_is_skipped_and_counted() {
        let mut win = ReorderWindow::new(4);
        assert_eq!(seqs(&win.push(1, 1)), vec![1]);

        // 2 never arrives; 3..=6 fill the window.
        assert!(win.push(3, 3).is_empty());
        assert!(win.push(4, 4).is_empty());
        assert!(win.push(5, 5).is_empty());
        // 6 pushes the span past the window: the gap at 2 is abandoned.
        let out = win.push(6, 6);
        assert_eq!(seqs(&out), vec![3, 4, 5, 6]);
        assert_eq!(win.lost(), 1);
    }

    #[test]
    fn hundred_packets_with_one_drop() {
        let mut win = ReorderWindow::new(16);
        let mut delivered = Vec::new();
        for seq in (1..=100u32).filter(|&s| s != 50) {
            for (s, _) in win.push(seq, seq) {
                delivered.push(s);
            }
        }
        delivered.extend(seqs(&win.drain()));

        // Exactly 99 frames, one detected gap, strictly increasing.
        assert_eq!(delivered.len(), 99);
        assert_eq!(win.lost(), 1);
        assert!(delivered.windows(2).all(|w| w[0] < w[1]));
        assert!(!delivered.contains(&50));
    }

    #[test]
    fn late_packet_below_window_is_dropped() {
        let mut win = ReorderWindow::new(2);
        let _ = win.push(1, 1);
        let _ = win.push(4, 4);
        let _ = win.push(5, 5); // gap at 2,3 skipped
        assert!(win.lost() >= 2);

        // 2 limps in after the gap was abandoned.
        assert!(win.push(2, 2).is_empty());
    }

    #[test]
    fn drain_flushes_tail() {
        let mut win = ReorderWindow::new(16);
        let _ = win.push(1, 1);
        let _ = win.push(4, 4);
        let out = win.drain();
        assert_eq!(seqs(&out), vec![4]);
        assert_eq!(win.lost(), 2);
    }
}
