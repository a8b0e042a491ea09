use super::constants::MASK_LENGTH;

/// XORs `buffer` in place with the 4 byte `mask`, starting at logical position `offset` of the
/// payload.
///
/// Applying the cipher twice with the same mask and offset restores the original bytes. When a
/// payload arrives in several chunks, each chunk must be passed with an offset equal to the total
/// length of the chunks that came before it; the result is identical to unmasking the whole payload
/// in one call.
pub fn apply_mask(buffer: &mut [u8], mask: [u8; MASK_LENGTH], offset: usize) {
	let shift = offset % MASK_LENGTH;
	let key = [
		mask[shift],
		mask[(shift + 1) % MASK_LENGTH],
		mask[(shift + 2) % MASK_LENGTH],
		mask[(shift + 3) % MASK_LENGTH],
	];

	let mut chunks = buffer.chunks_exact_mut(MASK_LENGTH);
	for chunk in &mut chunks {
		chunk[0] ^= key[0];
		chunk[1] ^= key[1];
		chunk[2] ^= key[2];
		chunk[3] ^= key[3];
	}

	for (byte, k) in chunks.into_remainder().iter_mut().zip(key) {
		*byte ^= k;
	}
}
