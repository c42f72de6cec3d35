//! Storage for fields the schema does not describe.
//!
//! Every occurrence is kept in a per-number, per-wire-type bucket in the order it was read.  When
//! written back out, each field number emits its buckets in the order varint, fixed32, fixed64,
//! length-delimited, group; the message codec interleaves those numbers with its known fields.

use std::collections::BTreeMap;

use wirebuf::{pack_helper, v64, CodedInput, Packable};

use super::{next_tag, Error, FieldNumber, Tag, WireType};

/////////////////////////////////////////// UnknownField ///////////////////////////////////////////

/// Every value seen for one unknown field number, bucketed by wire type.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UnknownField {
    varint: Vec<u64>,
    fixed32: Vec<u32>,
    fixed64: Vec<u64>,
    length_delimited: Vec<Vec<u8>>,
    group: Vec<UnknownFieldSet>,
}

impl UnknownField {
    pub fn varint(&self) -> &[u64] {
        &self.varint
    }

    pub fn fixed32(&self) -> &[u32] {
        &self.fixed32
    }

    pub fn fixed64(&self) -> &[u64] {
        &self.fixed64
    }

    pub fn length_delimited(&self) -> &[Vec<u8>] {
        &self.length_delimited
    }

    pub fn group(&self) -> &[UnknownFieldSet] {
        &self.group
    }

    pub fn is_empty(&self) -> bool {
        self.varint.is_empty()
            && self.fixed32.is_empty()
            && self.fixed64.is_empty()
            && self.length_delimited.is_empty()
            && self.group.is_empty()
    }

    /// Append each of `other`'s buckets to the matching bucket of `self`.
    pub fn merge_from(&mut self, other: &UnknownField) {
        self.varint.extend_from_slice(&other.varint);
        self.fixed32.extend_from_slice(&other.fixed32);
        self.fixed64.extend_from_slice(&other.fixed64);
        self.length_delimited
            .extend(other.length_delimited.iter().cloned());
        self.group.extend(other.group.iter().cloned());
    }

    /// A packer for this field's entries under `field_number`.
    pub fn packer(&self, field_number: FieldNumber) -> UnknownFieldPacker<'_> {
        UnknownFieldPacker {
            field_number,
            field: self,
            skip_length_delimited: false,
        }
    }
}

//////////////////////////////////////// UnknownFieldPacker ////////////////////////////////////////

/// Writes one unknown field's buckets as individually tagged entries.
pub struct UnknownFieldPacker<'a> {
    field_number: FieldNumber,
    field: &'a UnknownField,
    skip_length_delimited: bool,
}

impl UnknownFieldPacker<'_> {
    /// Leave the length-delimited bucket out.  Message sets write those entries as items.
    pub(crate) fn without_length_delimited(mut self) -> Self {
        self.skip_length_delimited = true;
        self
    }

    fn tag(&self, wire_type: WireType) -> Tag {
        Tag {
            field_number: self.field_number,
            wire_type,
        }
    }
}

impl Packable for UnknownFieldPacker<'_> {
    fn pack_sz(&self) -> usize {
        let mut sz = 0;
        let varint_tag = self.tag(WireType::Varint).pack_sz();
        for x in self.field.varint.iter() {
            sz += varint_tag + v64::from(*x).pack_sz();
        }
        sz += self.field.fixed32.len() * (self.tag(WireType::ThirtyTwo).pack_sz() + 4);
        sz += self.field.fixed64.len() * (self.tag(WireType::SixtyFour).pack_sz() + 8);
        if !self.skip_length_delimited {
            let ld_tag = self.tag(WireType::LengthDelimited).pack_sz();
            for bytes in self.field.length_delimited.iter() {
                sz += ld_tag + bytes.as_slice().pack_sz();
            }
        }
        let group_tags =
            self.tag(WireType::StartGroup).pack_sz() + self.tag(WireType::EndGroup).pack_sz();
        for group in self.field.group.iter() {
            sz += group_tags + group.pack_sz();
        }
        sz
    }

    fn pack(&self, out: &mut [u8]) {
        let mut out = out;
        for x in self.field.varint.iter() {
            out = pack_helper(self.tag(WireType::Varint), out);
            out = pack_helper(v64::from(*x), out);
        }
        for x in self.field.fixed32.iter() {
            out = pack_helper(self.tag(WireType::ThirtyTwo), out);
            out = pack_helper(*x, out);
        }
        for x in self.field.fixed64.iter() {
            out = pack_helper(self.tag(WireType::SixtyFour), out);
            out = pack_helper(*x, out);
        }
        if !self.skip_length_delimited {
            for bytes in self.field.length_delimited.iter() {
                out = pack_helper(self.tag(WireType::LengthDelimited), out);
                out = pack_helper(bytes.as_slice(), out);
            }
        }
        for group in self.field.group.iter() {
            out = pack_helper(self.tag(WireType::StartGroup), out);
            out = pack_helper(group, out);
            out = pack_helper(self.tag(WireType::EndGroup), out);
        }
    }
}

////////////////////////////////////////// UnknownFieldSet /////////////////////////////////////////

/// UnknownFieldSet maps field numbers to the [UnknownField] collected for each.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UnknownFieldSet {
    fields: BTreeMap<u32, UnknownField>,
}

impl UnknownFieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `buf` entirely as unknown fields.
    pub fn parse(buf: &[u8]) -> Result<Self, Error> {
        Self::parse_all(buf).map_err(Error::record)
    }

    fn parse_all(buf: &[u8]) -> Result<Self, Error> {
        let mut input = CodedInput::new(buf);
        let mut set = Self::new();
        while let Some(tag) = next_tag(&mut input)? {
            if tag.wire_type == WireType::EndGroup {
                return Err(Error::MalformedGroup {
                    field_number: tag.field_number.get(),
                    what: "end of group without a start",
                });
            }
            set.read_field(tag, &mut input)?;
        }
        Ok(set)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The number of distinct field numbers held.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn get(&self, field_number: u32) -> Option<&UnknownField> {
        self.fields.get(&field_number)
    }

    pub fn has_field(&self, field_number: u32) -> bool {
        self.fields.contains_key(&field_number)
    }

    /// Fields in ascending number order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &UnknownField)> {
        self.fields.iter().map(|(n, f)| (*n, f))
    }

    fn bucket(&mut self, field_number: FieldNumber) -> &mut UnknownField {
        self.fields.entry(field_number.get()).or_default()
    }

    pub fn merge_varint(&mut self, field_number: FieldNumber, value: u64) -> &mut Self {
        self.bucket(field_number).varint.push(value);
        self
    }

    pub fn merge_fixed32(&mut self, field_number: FieldNumber, value: u32) -> &mut Self {
        self.bucket(field_number).fixed32.push(value);
        self
    }

    pub fn merge_fixed64(&mut self, field_number: FieldNumber, value: u64) -> &mut Self {
        self.bucket(field_number).fixed64.push(value);
        self
    }

    pub fn merge_length_delimited(&mut self, field_number: FieldNumber, value: Vec<u8>) -> &mut Self {
        self.bucket(field_number).length_delimited.push(value);
        self
    }

    pub fn merge_group(&mut self, field_number: FieldNumber, value: UnknownFieldSet) -> &mut Self {
        self.bucket(field_number).group.push(value);
        self
    }

    /// Append every bucket of `field` to `field_number`'s buckets.
    pub fn merge_field(&mut self, field_number: FieldNumber, field: &UnknownField) -> &mut Self {
        self.bucket(field_number).merge_from(field);
        self
    }

    /// Concatenate all of `other`'s buckets onto the matching buckets here.
    pub fn merge_from(&mut self, other: &UnknownFieldSet) -> &mut Self {
        for (number, field) in other.fields.iter() {
            self.fields.entry(*number).or_default().merge_from(field);
        }
        self
    }

    /// Read the value that follows `tag` and keep it.  `tag` must not be an end-group tag.
    pub fn merge_field_from(&mut self, tag: Tag, input: &mut CodedInput<'_>) -> Result<(), Error> {
        self.read_field(tag, input).map_err(Error::record)
    }

    // merge_field_from for the codec, which records errors when the whole parse fails.
    pub(crate) fn read_field(&mut self, tag: Tag, input: &mut CodedInput<'_>) -> Result<(), Error> {
        let number = tag.field_number;
        match tag.wire_type {
            WireType::Varint => {
                let x = input.read_varint()?;
                self.merge_varint(number, x);
            }
            WireType::SixtyFour => {
                let x = input.read_fixed64()?;
                self.merge_fixed64(number, x);
            }
            WireType::ThirtyTwo => {
                let x = input.read_fixed32()?;
                self.merge_fixed32(number, x);
            }
            WireType::LengthDelimited => {
                let bytes = input.read_length_delimited()?;
                self.merge_length_delimited(number, bytes.to_vec());
            }
            WireType::StartGroup => {
                input.enter_recursion()?;
                let group = Self::parse_group(number, input);
                input.leave_recursion();
                self.merge_group(number, group?);
            }
            WireType::EndGroup => {
                return Err(Error::MalformedGroup {
                    field_number: number.get(),
                    what: "end of group without a start",
                });
            }
        }
        Ok(())
    }

    fn parse_group(number: FieldNumber, input: &mut CodedInput<'_>) -> Result<Self, Error> {
        let mut group = Self::new();
        loop {
            match next_tag(input)? {
                None => {
                    return Err(Error::MalformedGroup {
                        field_number: number.get(),
                        what: "input ended inside group",
                    });
                }
                Some(tag) if tag.wire_type == WireType::EndGroup => {
                    if tag.field_number != number {
                        return Err(Error::MalformedGroup {
                            field_number: number.get(),
                            what: "group ended by a different field number",
                        });
                    }
                    return Ok(group);
                }
                Some(tag) => group.read_field(tag, input)?,
            }
        }
    }
}

impl Packable for UnknownFieldSet {
    fn pack_sz(&self) -> usize {
        self.fields
            .iter()
            .filter_map(|(n, f)| FieldNumber::new(*n).ok().map(|n| f.packer(n).pack_sz()))
            .sum()
    }

    fn pack(&self, out: &mut [u8]) {
        let mut out = out;
        for (n, f) in self.fields.iter() {
            if let Ok(n) = FieldNumber::new(*n) {
                out = pack_helper(f.packer(n), out);
            }
        }
    }
}

///////////////////////////////////////////// mod tests ////////////////////////////////////////////
