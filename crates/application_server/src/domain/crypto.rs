use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use common::domain::{AesKey, DevAddr};

/// Frame direction as encoded in the keystream block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Uplink = 0,
    Downlink = 1,
}

/// Applies the LoRaWAN FRMPayload keystream for the given session and frame counter.
///
/// Encryption and decryption are the same operation. The output has the input's length.
pub fn encrypt_frm_payload(
    key: &AesKey,
    dev_addr: &DevAddr,
    f_cnt: u32,
    direction: Direction,
    data: &[u8],
) -> Vec<u8> {
    let cipher = Aes128::new(GenericArray::from_slice(key.as_bytes()));

    let mut a = [0u8; 16];
    a[0] = 0x01;
    a[5] = direction as u8;
    for (slot, byte) in a[6..10].iter_mut().zip(dev_addr.as_bytes().iter().rev()) {
        *slot = *byte;
    }
    a[10..14].copy_from_slice(&f_cnt.to_le_bytes());

    let mut out = data.to_vec();
    for (i, chunk) in out.chunks_mut(16).enumerate() {
        a[15] = (i + 1) as u8;
        let mut block = aes::Block::from(a);
        cipher.encrypt_block(&mut block);
        for (byte, key_byte) in chunk.iter_mut().zip(block.iter()) {
            *byte ^= key_byte;
        }
    }
    out
}
