use sensorgate_pipeline::codec::ChannelKind;

// ═══════════════════════════════════════════════════════════════
//  Readings
// ═══════════════════════════════════════════════════════════════

/// Raw integer reading as a device would send it, before the server
/// scales it by the channel divisor.
pub fn raw_reading(kind: ChannelKind, rng: &mut Rng) -> u64 {
    let (lo, hi) = match kind {
        ChannelKind::Temp => (1000, 2500),
        _ => (10, 5500),
    };
    lo + rng.next_intn((hi - lo) as usize) as u64
}

/// Payload for `topic`, or `None` when the topic names no channel.
pub fn payload_for(topic: &str, rng: &mut Rng) -> Option<Vec<u8>> {
    let kind = topic.rsplit('/').next().map(ChannelKind::from_level)?;
    Some(raw_reading(kind, rng).to_string().into_bytes())
}

// ═══════════════════════════════════════════════════════════════
//  RNG (xorshift64)
// ═══════════════════════════════════════════════════════════════

pub struct Rng {
    state: u64,
}

impl Rng {
    pub fn new(seed: i64) -> Self {
        let state = if seed == 0 {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as u64
                | 1 // ensure non-zero
        } else {
            seed as u64
        };
        Self { state }
    }

    fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    pub fn next_intn(&mut self, n: usize) -> usize {
        (self.next_u64() % n.max(1) as u64) as usize
    }
}
