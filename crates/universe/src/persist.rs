//! Byte layout for a persisted UTXO record, per the host's external
//! interface: program id, entry-point name, archived memory, token set.

use crate::token::TokenRecord;
use crate::utxo::{Utxo, UtxoLifecycle};
use starstream_core::ProgramId;
use starstream_io::{BinaryReader, BinaryWriter, IoError, Result as IoResult};

fn lifecycle_tag(state: UtxoLifecycle) -> u8 {
    match state {
        UtxoLifecycle::NotStarted => 0,
        UtxoLifecycle::Yielded => 1,
        UtxoLifecycle::Returned => 2,
        UtxoLifecycle::Consumed => 3,
    }
}

fn lifecycle_from_tag(tag: u8) -> IoResult<UtxoLifecycle> {
    Ok(match tag {
        0 => UtxoLifecycle::NotStarted,
        1 => UtxoLifecycle::Yielded,
        2 => UtxoLifecycle::Returned,
        3 => UtxoLifecycle::Consumed,
        _ => {
            return Err(IoError::InvalidUtf8 {
                field: "utxo lifecycle tag",
            })
        }
    })
}

pub fn encode_utxo(utxo: &Utxo, writer: &mut BinaryWriter) {
    writer.write_fixed(utxo.program_id.as_bytes());
    writer.write_string(&utxo.entry_point);
    writer.write_u8(lifecycle_tag(utxo.state));
    match &utxo.memory {
        Some(bytes) => {
            writer.write_u8(1);
            writer.write_bytes(bytes);
        }
        None => writer.write_u8(0),
    }
    writer.write_u32(utxo.tokens.len() as u32);
    for token in &utxo.tokens {
        writer.write_fixed(token.minting_program_id.as_bytes());
        writer.write_string(&token.mint_fn);
        writer.write_u64(token.id);
        writer.write_u64(token.amount);
    }
}

pub fn decode_utxo(reader: &mut BinaryReader) -> IoResult<Utxo> {
    let program_id = ProgramId::from_bytes(reader.read_fixed::<32>()?);
    let entry_point = reader.read_string()?;
    let state = lifecycle_from_tag(reader.read_u8()?)?;
    let memory = match reader.read_u8()? {
        1 => Some(reader.read_bytes()?),
        _ => None,
    };
    let token_count = reader.read_u32()?;
    let mut tokens = Vec::with_capacity(token_count as usize);
    for _ in 0..token_count {
        let minting_program_id = ProgramId::from_bytes(reader.read_fixed::<32>()?);
        let mint_fn = reader.read_string()?;
        let id = reader.read_u64()?;
        let amount = reader.read_u64()?;
        tokens.push(TokenRecord::new(minting_program_id, mint_fn, id, amount));
    }
    Ok(Utxo {
        program_id,
        entry_point,
        tokens,
        state,
        memory,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_an_archived_utxo_with_tokens() {
        let mut utxo = Utxo::new(ProgramId::of(b"p2pkh"), "main");
        utxo.state = UtxoLifecycle::Yielded;
        utxo.memory = Some(vec![1, 2, 3, 4]);
        utxo.tokens.push(TokenRecord::new(ProgramId::of(b"nft"), "nft", 3, 1));

        let mut writer = BinaryWriter::new();
        encode_utxo(&utxo, &mut writer);
        let bytes = writer.into_bytes();

        let mut reader = BinaryReader::new(&bytes);
        let back = decode_utxo(&mut reader).unwrap();
        assert_eq!(back.program_id, utxo.program_id);
        assert_eq!(back.entry_point, utxo.entry_point);
        assert_eq!(back.state, utxo.state);
        assert_eq!(back.memory, utxo.memory);
        assert_eq!(back.tokens, utxo.tokens);
    }
}
