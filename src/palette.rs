//! Heatmap colour → intensity lookup.
//!
//! Heatmap tiles encode density with a fixed colour ramp (black → red → yellow →
//! white) and with opacity. [`PALETTE`] is the ramp as a static 256-entry table,
//! index = intensity. Decoding goes the other way through a quantised RGB cube
//! that maps every colour to the index of its nearest palette entry; the cube
//! is filled once on first use and read-only afterwards.

use std::sync::OnceLock;

/// Ramp stops as `(intensity, rgb)`; entries in between are interpolated.
const STOPS: [(usize, [u8; 3]); 4] = [
    (0, [0, 0, 0]),
    (85, [255, 0, 0]),
    (170, [255, 255, 0]),
    (255, [255, 255, 255]),
];

const fn build_palette() -> [[u8; 3]; 256] {
    let mut table = [[0u8; 3]; 256];
    let mut s = 0;
    while s + 1 < STOPS.len() {
        let (from, lo) = STOPS[s];
        let (to, hi) = STOPS[s + 1];
        let mut i = from;
        while i <= to {
            let mut c = 0;
            while c < 3 {
                let span = (hi[c] as isize - lo[c] as isize) * (i - from) as isize;
                table[i][c] = (lo[c] as isize + span / (to - from) as isize) as u8;
                c += 1;
            }
            i += 1;
        }
        s += 1;
    }
    table
}

/// The colour ramp, indexed by intensity.
pub static PALETTE: [[u8; 3]; 256] = build_palette();

/// Bits kept per channel in the reverse lookup cube.
const CUBE_BITS: u32 = 5;
const CUBE_SIDE: usize = 1 << CUBE_BITS;

static CUBE: OnceLock<Vec<u8>> = OnceLock::new();

fn cube() -> &'static [u8] {
    CUBE.get_or_init(|| {
        let step = 256 / CUBE_SIDE;
        let mut cube = vec![0u8; CUBE_SIDE * CUBE_SIDE * CUBE_SIDE];
        for r in 0..CUBE_SIDE {
            for g in 0..CUBE_SIDE {
                for b in 0..CUBE_SIDE {
                    let centre = [
                        (r * step + step / 2) as i32,
                        (g * step + step / 2) as i32,
                        (b * step + step / 2) as i32,
                    ];
                    let nearest = PALETTE
                        .iter()
                        .enumerate()
                        .min_by_key(|(_, entry)| {
                            (0..3)
                                .map(|c| {
                                    let d = i32::from(entry[c]) - centre[c];
                                    d * d
                                })
                                .sum::<i32>()
                        })
                        .map(|(i, _)| i as u8)
                        .unwrap_or(0);
                    cube[(r * CUBE_SIDE + g) * CUBE_SIDE + b] = nearest;
                }
            }
        }
        cube
    })
}

/// Intensity of an RGBA heatmap pixel, 0-255.
#[inline]
pub fn intensity(rgba: [u8; 4]) -> u8 {
    if rgba[3] == 0 {
        return 0;
    }
    let shift = 8 - CUBE_BITS;
    let idx = ((usize::from(rgba[0] >> shift) * CUBE_SIDE) + usize::from(rgba[1] >> shift)) * CUBE_SIDE
        + usize::from(rgba[2] >> shift);
    let level = u16::from(cube()[idx]);
    (level * u16::from(rgba[3]) / 255) as u8
}

/// Opaque colour of an intensity level.
#[inline]
pub fn color(level: u8) -> [u8; 4] {
    let [r, g, b] = PALETTE[usize::from(level)];
    [r, g, b, 255]
}
