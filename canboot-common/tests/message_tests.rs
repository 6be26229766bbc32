// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Unit tests for bootloader request decoders and reply builders.

use canboot_common::frame::{CanFrame, Clas};
use canboot_common::message::{
    self, AddressRequest, AdditionalInfoAssembler, AdditionalInfoChunk, BoardRequest,
    BroadcastInfo, SetCanAddressRequest, SetIdRequest,
};
use canboot_common::protocol::{BootloaderCmd, FirmwareVersion, Process};

fn bl(cmd: u8, data: &[u8]) -> CanFrame {
    CanFrame::build(Clas::Bootloader, cmd, 0, 3, data).unwrap()
}

fn info_block() -> [u8; 32] {
    let mut block = [0u8; 32];
    for (i, b) in block.iter_mut().enumerate() {
        *b = i as u8 + 0x40;
    }
    block
}

// =============================================================================
// Request decoders
// =============================================================================

#[test]
fn test_board_request_erase_flag() {
    assert!(BoardRequest::load(&bl(0x00, &[1])).erase_eeprom);
    assert!(!BoardRequest::load(&bl(0x00, &[0])).erase_eeprom);
    assert!(!BoardRequest::load(&bl(0x00, &[2])).erase_eeprom);
    assert!(!BoardRequest::load(&bl(0x00, &[])).erase_eeprom);
}

#[test]
fn test_address_request_skips_offset_three() {
    let frame = bl(0x01, &[16, 0x00, 0x01, 0xEE, 0x01, 0x10]);
    let msg = AddressRequest::load(&frame);
    assert_eq!(msg.datalen, 16);
    assert_eq!(msg.address, 0x1001_0100);
}

#[test]
fn test_address_request_builder_matches_decoder() {
    let frame = message::address_request(0, 3, 12, 0x1002_3456).unwrap();
    let msg = AddressRequest::load(&frame);
    assert_eq!(msg.datalen, 12);
    assert_eq!(msg.address, 0x1002_3456);
}

#[test]
fn test_set_can_address_mask_only_in_size_three() {
    let mut frame = bl(0x32, &[0xFF, 0x34, 0x12]);
    frame.size = 3;
    let with_mask = SetCanAddressRequest::load(&frame);
    assert_eq!(with_mask.address, 0xFF);
    assert_eq!(with_mask.random_invalid_mask, 0x1234);

    let without = SetCanAddressRequest::load(&bl(0x32, &[5]));
    assert_eq!(without.address, 5);
    assert_eq!(without.random_invalid_mask, 0);

    // size 4: the mask bytes are ignored
    let longer = SetCanAddressRequest::load(&bl(0x32, &[0xFF, 0x34, 0x12]));
    assert_eq!(longer.size, 4);
    assert_eq!(longer.random_invalid_mask, 0);
}

#[test]
fn test_set_can_address_builder_matches_decoder() {
    let frame = message::set_can_address_request(0, 3, 0xFF, Some(0x00F0)).unwrap();
    assert_eq!(frame.size, 3);
    let msg = SetCanAddressRequest::load(&frame);
    assert_eq!(msg.address, 0xFF);
    assert_eq!(msg.random_invalid_mask, 0x00F0);

    let frame = message::set_can_address_request(0, 3, 9, None).unwrap();
    assert_eq!(frame.size, 2);
    assert_eq!(SetCanAddressRequest::load(&frame).address, 9);
}

#[test]
fn test_set_id_request() {
    let frame = CanFrame::build(Clas::PollingAnalogSensor, 0x32, 0, 3, &[9]).unwrap();
    assert_eq!(SetIdRequest::load(&frame).address, 9);
}

#[test]
fn test_additional_info_chunk_decode() {
    let chunk = AdditionalInfoChunk::load(&bl(0x0D, &[2, 0xA, 0xB, 0xC, 0xD])).unwrap();
    assert_eq!(chunk.counter, 2);
    assert_eq!(chunk.bytes, [0xA, 0xB, 0xC, 0xD]);
}

#[test]
fn test_additional_info_chunk_rejects_counter_eight() {
    assert!(AdditionalInfoChunk::load(&bl(0x0D, &[8, 1, 2, 3, 4])).is_none());
}

// =============================================================================
// Additional info reassembly
// =============================================================================

fn chunk(counter: u8, block: &[u8; 32]) -> AdditionalInfoChunk {
    let o = 4 * counter as usize;
    AdditionalInfoChunk {
        counter,
        bytes: [block[o], block[o + 1], block[o + 2], block[o + 3]],
    }
}

#[test]
fn test_assembler_in_order() {
    let block = info_block();
    let mut asm = AdditionalInfoAssembler::new();
    for counter in 0..7 {
        assert_eq!(asm.push(&chunk(counter, &block)), None);
    }
    assert_eq!(asm.push(&chunk(7, &block)), Some(block));
    assert!(asm.is_complete());
}

#[test]
fn test_assembler_out_of_order() {
    let block = info_block();
    let mut asm = AdditionalInfoAssembler::new();
    for counter in [0, 5, 3, 1, 7, 2, 6] {
        assert_eq!(asm.push(&chunk(counter, &block)), None);
    }
    assert_eq!(asm.push(&chunk(4, &block)), Some(block));
}

#[test]
fn test_assembler_counter_zero_restarts() {
    let block = info_block();
    let mut asm = AdditionalInfoAssembler::new();
    for counter in 0..6 {
        asm.push(&chunk(counter, &block));
    }
    asm.push(&chunk(0, &block));
    assert!(!asm.is_complete());
    assert_eq!(asm.push(&chunk(6, &block)), None);
    assert_eq!(asm.push(&chunk(7, &block)), None);
}

// =============================================================================
// Reply builders
// =============================================================================

#[test]
fn test_broadcast_reply_bootloader_has_size_four() {
    let version = FirmwareVersion {
        major: 1,
        minor: 2,
        build: 255,
    };
    let reply = message::broadcast_reply(3, 0, 4, version, Process::Bootloader).unwrap();
    assert_eq!(reply.id, 0x730);
    assert_eq!(reply.size, 4);
    assert_eq!(reply.data[..4], [0xFF, 4, 1, 2]);
}

#[test]
fn test_broadcast_reply_application_has_build() {
    let version = FirmwareVersion {
        major: 1,
        minor: 2,
        build: 9,
    };
    let reply = message::broadcast_reply(3, 0, 4, version, Process::Application).unwrap();
    assert_eq!(reply.size, 5);
    assert_eq!(reply.data[..5], [0xFF, 4, 1, 2, 9]);
}

#[test]
fn test_board_reply_is_bare_command() {
    let reply = message::board_reply(3, 0).unwrap();
    assert_eq!(reply.size, 1);
    assert_eq!(reply.cmd(), BootloaderCmd::Board.code());
}

#[test]
fn test_ack_reply() {
    let reply = message::ack_reply(BootloaderCmd::Data, 3, 0, true).unwrap();
    assert_eq!(reply.size, 2);
    assert_eq!(reply.data[..2], [0x03, 1]);
    assert!(message::is_ack(&reply, BootloaderCmd::Data, 3));
    assert!(!message::is_ack(&reply, BootloaderCmd::Start, 3));
    assert!(!message::is_ack(&reply, BootloaderCmd::Data, 4));
}

#[test]
fn test_nack_is_not_ack() {
    let reply = message::ack_reply(BootloaderCmd::End, 3, 0, false).unwrap();
    assert!(!message::is_ack(&reply, BootloaderCmd::End, 3));
}

#[test]
fn test_additional_info_reply() {
    let block = info_block();
    let reply = message::additional_info_reply(3, 0, 7, &block).unwrap();
    assert_eq!(reply.size, 6);
    assert_eq!(reply.data[..6], [0x0C, 7, 0x5C, 0x5D, 0x5E, 0x5F]);
    assert!(message::additional_info_reply(3, 0, 8, &block).is_none());
}

// =============================================================================
// Host-side decoding
// =============================================================================

#[test]
fn test_broadcast_info_from_bootloader() {
    let version = FirmwareVersion {
        major: 1,
        minor: 2,
        build: 255,
    };
    let reply = message::broadcast_reply(3, 0, 4, version, Process::Bootloader).unwrap();
    let info = BroadcastInfo::load(&reply).unwrap();
    assert_eq!(info.address, 3);
    assert_eq!(info.board, 4);
    assert_eq!(info.firmware, version);
    assert_eq!(info.process, Process::Bootloader);
}

#[test]
fn test_broadcast_info_from_application() {
    let reply = CanFrame::build(Clas::Bootloader, 0xFF, 6, 0, &[12, 2, 0, 17]).unwrap();
    let info = BroadcastInfo::load(&reply).unwrap();
    assert_eq!(info.process, Process::Application);
    assert_eq!(info.firmware.build, 17);
}

#[test]
fn test_broadcast_info_rejects_other_commands() {
    let reply = message::board_reply(3, 0).unwrap();
    assert!(BroadcastInfo::load(&reply).is_none());
}

#[test]
fn test_data_request_limits_chunk() {
    assert!(message::data_request(0, 3, &[0; 7]).is_some());
    assert!(message::data_request(0, 3, &[0; 8]).is_none());
}
