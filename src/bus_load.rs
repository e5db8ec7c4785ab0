//! Bus-load accounting: lower/upper bounds on the number of bits a frame
//! occupies on the wire, and the resulting fractional bus load.
//!
//! Bit counts are grounded in `lib/can_device/can_bus_load.c`, reproduced
//! exactly.

use crate::frame::Frame;

const NON_STUFFABLE_2_0: u32 = 1 + 1 + 1 + 7 + 3; // SOF + CRC delim + ACK delim + EOF + IFS

// 2.0A (standard, 11-bit id)
const STUFFABLE_2_0A_FIXED: u32 = 11 + 1 + 1 + 1 + 4 + 15 + 1; // SID RTR IDE R0 DLC CRC ACK

// 2.0B (extended, 29-bit id)
const STUFFABLE_2_0B_FIXED: u32 = 11 + 1 + 1 + 18 + 1 + 2 + 4 + 15 + 1; // IDE-A SRR IDE IDE-B RTR R0+R1 DLC CRC ACK

fn stuffable_bits(frame: &Frame) -> u32 {
    let data_bits = 8 * frame.dlc() as u32;
    if frame.is_extended() {
        STUFFABLE_2_0B_FIXED + data_bits
    } else {
        STUFFABLE_2_0A_FIXED + data_bits
    }
}

/// Minimum and maximum bit counts a frame can occupy on the wire, in that
/// order. `min <= max` always holds.
pub fn bit_count_bounds(frame: &Frame) -> (u32, u32) {
    let stuffable = stuffable_bits(frame);
    let min = stuffable + NON_STUFFABLE_2_0;
    let worst_case_stuffing = (stuffable.saturating_sub(1) + 3) / 4;
    let max = min + worst_case_stuffing;
    (min, max)
}

/// Seconds to transmit one bit at `baudrate` bits per second.
pub fn bit_time(baudrate: u32) -> f64 {
    1.0 / baudrate as f64
}

/// Fraction of the bus's capacity consumed by `bits_received` bits over a
/// wall-clock period of `period_seconds`, in `[0, 1]` under normal
/// operation (callers may exceed 1.0 transiently if `bits_received` was
/// accumulated from a burst longer than the bus's nominal capacity allows).
pub fn bus_load(bits_received: u64, baudrate: u32, period_seconds: f64) -> f64 {
    bits_received as f64 * bit_time(baudrate) / period_seconds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_are_ordered_and_monotone_in_dlc() {
        let mut previous_max = 0;
        for dlc in 0..=8u8 {
            let frame = Frame::new(0x123, false, false, &vec![0u8; dlc as usize]).unwrap();
            let (min, max) = bit_count_bounds(&frame);
            assert!(min <= max);
            assert!(max >= previous_max);
            previous_max = max;
        }
    }

    #[test]
    fn extended_frame_has_larger_bounds_than_standard() {
        let standard = Frame::new(0x123, false, false, &[0; 8]).unwrap();
        let extended = Frame::new(0x123, true, false, &[0; 8]).unwrap();
        let (std_min, _) = bit_count_bounds(&standard);
        let (ext_min, _) = bit_count_bounds(&extended);
        assert!(ext_min > std_min);
    }

    #[test]
    fn bus_load_half_capacity() {
        // 500 kbit/s bus, 250000 bits received over one second => 50% load.
        let load = bus_load(250_000, 500_000, 1.0);
        assert!((load - 0.5).abs() < 1e-9);
    }
}
