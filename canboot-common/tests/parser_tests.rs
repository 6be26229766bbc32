// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Unit tests for the bootloader protocol state machine.

use canboot_common::board_info::{BoardInfoStore, StoreError, StoredInfo};
use canboot_common::config::BootConfig;
use canboot_common::countdown::Countdown;
use canboot_common::flash_burner::{FlashError, FlashProgrammer};
use canboot_common::frame::{CanFrame, Clas};
use canboot_common::message;
use canboot_common::parser::{
    route, Action, AddressError, BootContext, CanParser, RandomSource, Replies, State,
};
use canboot_common::protocol::{BootloaderCmd, FirmwareVersion};

const HOST: u8 = 0;
const BOARD: u8 = 3;

// =============================================================================
// Fakes
// =============================================================================

struct FakeStore {
    info: StoredInfo,
    /// `set` reports success but keeps nothing.
    frozen: bool,
    sets: usize,
    user_data_erases: usize,
}

impl BoardInfoStore for FakeStore {
    fn get(&mut self) -> StoredInfo {
        self.info
    }

    fn set(&mut self, info: &StoredInfo) -> Result<(), StoreError> {
        self.sets += 1;
        if !self.frozen {
            self.info = *info;
        }
        Ok(())
    }

    fn erase_user_data(&mut self) -> Result<(), StoreError> {
        self.user_data_erases += 1;
        Ok(())
    }
}

#[derive(Default)]
struct RecordingProgrammer {
    adds: Vec<(u32, Vec<u8>)>,
    flushes: usize,
    fail_add: bool,
    fail_flush: bool,
}

impl RecordingProgrammer {
    /// Staged bytes, concatenated in order.
    fn staged(&self) -> Vec<u8> {
        self.adds.iter().flat_map(|(_, d)| d.iter().copied()).collect()
    }
}

impl FlashProgrammer for RecordingProgrammer {
    fn add(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        if self.fail_add {
            return Err(FlashError::OutOfRange {
                address,
                len: data.len(),
            });
        }
        self.adds.push((address, data.to_vec()));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), FlashError> {
        if self.fail_flush {
            return Err(FlashError::Program { address: 0 });
        }
        self.flushes += 1;
        Ok(())
    }
}

#[derive(Default)]
struct MockCountdown {
    stops: usize,
    starts: Vec<u32>,
}

impl Countdown for MockCountdown {
    fn stop_countdown(&mut self) -> bool {
        self.stops += 1;
        true
    }

    fn start_countdown(&mut self, countdown_ms: u32) -> bool {
        self.starts.push(countdown_ms);
        true
    }
}

/// Replays a fixed sequence, then repeats the last value.
struct SeqRandom {
    values: Vec<u32>,
    draws: usize,
}

impl SeqRandom {
    fn new(values: &[u32]) -> Self {
        Self {
            values: values.to_vec(),
            draws: 0,
        }
    }
}

impl RandomSource for SeqRandom {
    fn next_u32(&mut self) -> u32 {
        let i = self.draws.min(self.values.len() - 1);
        self.draws += 1;
        self.values[i]
    }
}

/// xorshift32, for draws that cover the whole range.
struct XorShift(u32);

impl RandomSource for XorShift {
    fn next_u32(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }
}

type TestParser<R = SeqRandom> = CanParser<FakeStore, RecordingProgrammer, MockCountdown, R>;

fn stored_info() -> StoredInfo {
    StoredInfo {
        can_address: BOARD,
        board_type: 11,
        bootloader: FirmwareVersion {
            major: 1,
            minor: 4,
            build: 255,
        },
        ..StoredInfo::default()
    }
}

fn make_parser_with<R: RandomSource>(random: R) -> TestParser<R> {
    CanParser::new(BootContext {
        store: FakeStore {
            info: stored_info(),
            frozen: false,
            sets: 0,
            user_data_erases: 0,
        },
        programmer: RecordingProgrammer::default(),
        countdown: MockCountdown::default(),
        random,
        config: BootConfig::default(),
    })
}

fn make_parser() -> TestParser {
    make_parser_with(SeqRandom::new(&[5]))
}

fn bl(cmd: BootloaderCmd, destination: u8, data: &[u8]) -> CanFrame {
    CanFrame::build(Clas::Bootloader, cmd.code(), HOST, destination, data).unwrap()
}

fn send<R: RandomSource>(parser: &mut TestParser<R>, frame: CanFrame) -> Replies {
    let mut replies = Replies::new();
    let has_replies = parser.process(&frame, &mut replies);
    assert_eq!(has_replies, !replies.is_empty());
    replies
}

fn connected() -> TestParser {
    let mut p = make_parser();
    send(&mut p, bl(BootloaderCmd::Broadcast, 0xF, &[]));
    assert_eq!(p.state(), State::Connected);
    p
}

fn updating(erase_eeprom: bool) -> TestParser {
    let mut p = connected();
    send(&mut p, message::board_request(HOST, BOARD, erase_eeprom).unwrap());
    assert_eq!(p.state(), State::Updating);
    p
}

fn assert_ack(replies: &Replies, cmd: BootloaderCmd) {
    assert_eq!(replies.len(), 1);
    let reply = &replies[0];
    assert!(message::is_ack(reply, cmd, BOARD));
    assert_eq!(reply.destination(), HOST);
    assert_eq!(reply.size, 2);
}

// =============================================================================
// Routing table
// =============================================================================

#[test]
fn test_route_idle() {
    assert_eq!(
        route(State::Idle, Clas::Bootloader, 0xFF),
        Some(Action::Broadcast)
    );
    assert_eq!(route(State::Idle, Clas::Bootloader, 0x00), Some(Action::Board));
    assert_eq!(route(State::Idle, Clas::Bootloader, 0x01), None);
    assert_eq!(route(State::Idle, Clas::PollingMotorControl, 0xFF & 0x7F), None);
}

#[test]
fn test_route_connected_polling_set_id() {
    assert_eq!(
        route(State::Connected, Clas::PollingMotorControl, 0x32),
        Some(Action::SetId)
    );
    assert_eq!(
        route(State::Connected, Clas::PollingAnalogSensor, 0x32),
        Some(Action::SetId)
    );
    assert_eq!(route(State::Connected, Clas::PollingMotorControl, 0x00), None);
}

#[test]
fn test_route_updating_only_row_commands() {
    for cmd in [0x01, 0x02, 0x03, 0x04] {
        assert!(route(State::Updating, Clas::Bootloader, cmd).is_some());
    }
    for cmd in [0x00, 0x0C, 0x0D, 0x32, 0xFF] {
        assert_eq!(route(State::Updating, Clas::Bootloader, cmd), None);
    }
}

// =============================================================================
// P1: address filter
// =============================================================================

#[test]
fn test_frame_for_other_board_is_ignored() {
    let mut p = make_parser();
    let replies = send(&mut p, bl(BootloaderCmd::Broadcast, 4, &[]));
    assert!(replies.is_empty());
    assert_eq!(p.state(), State::Idle);
    assert_eq!(p.context().countdown.stops, 0);
}

#[test]
fn test_frame_for_own_address_is_accepted() {
    let mut p = make_parser();
    let replies = send(&mut p, bl(BootloaderCmd::Broadcast, BOARD, &[]));
    assert_eq!(replies.len(), 1);
    assert_eq!(p.state(), State::Connected);
}

#[test]
fn test_periodic_frames_are_ignored() {
    let mut p = make_parser();
    // low nibble equals our address but is a command for periodic classes
    let frame = CanFrame::build(Clas::PeriodicMotorControl, BOARD, HOST, 0, &[0; 8]).unwrap();
    assert!(send(&mut p, frame).is_empty());
    assert_eq!(p.context().countdown.stops, 0);
}

// =============================================================================
// P2: Idle whitelist
// =============================================================================

#[test]
fn test_idle_ignores_other_bootloader_commands() {
    for cmd in [
        BootloaderCmd::Address,
        BootloaderCmd::Start,
        BootloaderCmd::Data,
        BootloaderCmd::End,
        BootloaderCmd::GetAdditionalInfo,
        BootloaderCmd::SetAdditionalInfo,
        BootloaderCmd::SetCanAddress,
    ] {
        let mut p = make_parser();
        let replies = send(&mut p, bl(cmd, BOARD, &[1, 2, 3]));
        assert!(replies.is_empty(), "{:?} replied in Idle", cmd);
        assert_eq!(p.state(), State::Idle);
    }
}

#[test]
fn test_idle_ignores_polling_set_id() {
    let mut p = make_parser();
    let frame = CanFrame::build(Clas::PollingMotorControl, 0x32, HOST, BOARD, &[9]).unwrap();
    assert!(send(&mut p, frame).is_empty());
    assert_eq!(p.state(), State::Idle);
    assert_eq!(p.can_address(), BOARD);
}

#[test]
fn test_idle_board_enters_updating() {
    let mut p = make_parser();
    let replies = send(&mut p, message::board_request(HOST, BOARD, false).unwrap());
    assert_eq!(p.state(), State::Updating);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].size, 1);
    assert_eq!(replies[0].cmd(), BootloaderCmd::Board.code());
}

#[test]
fn test_idle_board_matches_command_code_of_any_class() {
    let mut p = make_parser();
    let frame = CanFrame::build(Clas::PollingAnalogSensor, 0x00, HOST, BOARD, &[]).unwrap();
    send(&mut p, frame);
    assert_eq!(p.state(), State::Updating);
}

#[test]
fn test_connected_board_requires_bootloader_class() {
    let mut p = connected();
    let frame = CanFrame::build(Clas::PollingAnalogSensor, 0x00, HOST, BOARD, &[]).unwrap();
    assert!(send(&mut p, frame).is_empty());
    assert_eq!(p.state(), State::Connected);
}

#[test]
fn test_connected_broadcast_stays_connected() {
    let mut p = connected();
    let replies = send(&mut p, bl(BootloaderCmd::Broadcast, 0xF, &[]));
    assert_eq!(replies.len(), 1);
    assert_eq!(p.state(), State::Connected);
}

#[test]
fn test_updating_ignores_broadcast() {
    let mut p = updating(false);
    assert!(send(&mut p, bl(BootloaderCmd::Broadcast, 0xF, &[])).is_empty());
    assert_eq!(p.state(), State::Updating);
}

// =============================================================================
// P3: row integrity
// =============================================================================

#[test]
fn test_address_sets_row() {
    let mut p = updating(false);
    let replies = send(&mut p, message::address_request(HOST, BOARD, 16, 0x1001_0000).unwrap());
    assert!(replies.is_empty());
    let row = p.row();
    assert_eq!(row.address, 0x1001_0000);
    assert_eq!(row.datalen, 16);
    assert_eq!(row.received, 0);
}

#[test]
fn test_data_overflow_is_dropped() {
    let mut p = updating(false);
    send(&mut p, message::address_request(HOST, BOARD, 4, 0x1001_0000).unwrap());
    let replies = send(&mut p, message::data_request(HOST, BOARD, &[1, 2, 3, 4, 5]).unwrap());
    assert!(replies.is_empty());
    assert!(p.context().programmer.adds.is_empty());
    assert_eq!(p.row().received, 0);

    // the row still completes with the right amount
    let replies = send(&mut p, message::data_request(HOST, BOARD, &[1, 2, 3, 4]).unwrap());
    assert_ack(&replies, BootloaderCmd::Data);
}

#[test]
fn test_data_after_complete_row_is_dropped() {
    let mut p = updating(false);
    send(&mut p, message::address_request(HOST, BOARD, 2, 0x1001_0000).unwrap());
    send(&mut p, message::data_request(HOST, BOARD, &[1, 2]).unwrap());
    let replies = send(&mut p, message::data_request(HOST, BOARD, &[3]).unwrap());
    assert!(replies.is_empty());
    assert_eq!(p.context().programmer.adds.len(), 1);
}

#[test]
fn test_data_before_address_is_dropped() {
    let mut p = updating(false);
    let replies = send(&mut p, message::data_request(HOST, BOARD, &[1]).unwrap());
    assert!(replies.is_empty());
    assert!(p.context().programmer.adds.is_empty());
}

#[test]
fn test_new_address_restarts_row() {
    let mut p = updating(false);
    send(&mut p, message::address_request(HOST, BOARD, 8, 0x1001_0000).unwrap());
    send(&mut p, message::data_request(HOST, BOARD, &[1, 2, 3]).unwrap());
    send(&mut p, message::address_request(HOST, BOARD, 8, 0x1001_0000).unwrap());
    assert_eq!(p.row().received, 0);

    send(&mut p, message::data_request(HOST, BOARD, &[1; 7]).unwrap());
    let replies = send(&mut p, message::data_request(HOST, BOARD, &[1]).unwrap());
    assert_ack(&replies, BootloaderCmd::Data);
}

#[test]
fn test_data_staging_failure_sends_no_ack() {
    let mut p = updating(false);
    send(&mut p, message::address_request(HOST, BOARD, 2, 0x1001_0000).unwrap());
    p.context_mut().programmer.fail_add = true;
    let replies = send(&mut p, message::data_request(HOST, BOARD, &[1, 2]).unwrap());
    assert!(replies.is_empty());
    assert_eq!(p.row().received, 0);
}

// =============================================================================
// P4: address assignment
// =============================================================================

#[test]
fn test_set_explicit_address() {
    let mut p = connected();
    assert_eq!(p.set_can_address(9, 0), Ok(9));
    assert_eq!(p.can_address(), 9);
    assert_eq!(p.context().store.info.can_address, 9);
}

#[test]
fn test_same_address_is_not_rewritten() {
    let mut p = connected();
    assert_eq!(p.set_can_address(BOARD, 0), Ok(BOARD));
    assert_eq!(p.context().store.sets, 0);
}

#[test]
fn test_reserved_addresses_are_rejected() {
    let mut p = connected();
    assert_eq!(p.set_can_address(0, 0), Err(AddressError::Reserved));
    assert_eq!(p.set_can_address(15, 0), Err(AddressError::Reserved));
    assert_eq!(p.can_address(), BOARD);
    assert_eq!(p.context().store.sets, 0);
}

#[test]
fn test_random_address_skips_invalid_values() {
    // 0 and 15 are always excluded, 0x10 reads as 0
    let mut p = make_parser_with(SeqRandom::new(&[0, 15, 0x10, 2, 7]));
    assert_eq!(p.set_can_address(0xFF, 1 << 2), Ok(7));
    assert_eq!(p.context().random.draws, 5);
    assert_eq!(p.context().store.info.can_address, 7);
}

#[test]
fn test_random_address_full_mask_fails_without_drawing() {
    let mut p = make_parser();
    assert_eq!(p.set_can_address(0xFF, 0xFFFF), Err(AddressError::NoCandidate));
    // the reserved bits complete the mask
    assert_eq!(p.set_can_address(0xFF, 0x7FFE), Err(AddressError::NoCandidate));
    assert_eq!(p.context().random.draws, 0);
    assert_eq!(p.can_address(), BOARD);
}

#[test]
fn test_random_address_gives_up_after_250_draws() {
    let mut p = make_parser_with(SeqRandom::new(&[0]));
    assert_eq!(p.set_can_address(0xFF, 0), Err(AddressError::RandomExhausted));
    assert_eq!(p.context().random.draws, 250);
    assert_eq!(p.can_address(), BOARD);
}

#[test]
fn test_random_address_with_empty_mask_in_range() {
    let mut p = make_parser_with(XorShift(0x1234_5678));
    for _ in 0..200 {
        let address = p.set_can_address(0xFF, 0).unwrap();
        assert!((1..=14).contains(&address));
        assert_eq!(p.can_address(), address);
    }
}

#[test]
fn test_address_not_persisted_fails() {
    let mut p = connected();
    p.context_mut().store.frozen = true;
    assert_eq!(p.set_can_address(9, 0), Err(AddressError::NotPersisted));
    assert_eq!(p.can_address(), BOARD);
}

#[test]
fn test_set_can_address_rereads_store() {
    let mut p = connected();
    p.context_mut().store.info.can_address = 6;
    assert_eq!(p.set_can_address(6, 0), Ok(6));
    assert_eq!(p.can_address(), 6);
    assert_eq!(p.context().store.sets, 0);
}

#[test]
fn test_setcanaddress_frame_changes_address_silently() {
    let mut p = connected();
    let replies = send(
        &mut p,
        message::set_can_address_request(HOST, BOARD, 9, None).unwrap(),
    );
    assert!(replies.is_empty());
    assert_eq!(p.can_address(), 9);
    assert_eq!(p.state(), State::Connected);

    // the old address no longer reaches us, the new one does
    assert!(send(&mut p, bl(BootloaderCmd::Broadcast, BOARD, &[])).is_empty());
    let replies = send(&mut p, bl(BootloaderCmd::Broadcast, 9, &[]));
    assert_eq!(replies[0].sender(), 9);
}

#[test]
fn test_setcanaddress_frame_rejected_address_is_silent() {
    let mut p = connected();
    let replies = send(
        &mut p,
        message::set_can_address_request(HOST, BOARD, 0, None).unwrap(),
    );
    assert!(replies.is_empty());
    assert_eq!(p.can_address(), BOARD);
    assert_eq!(p.state(), State::Connected);
    assert_eq!(p.context().store.sets, 0);
}

#[test]
fn test_address_error_messages() {
    assert_eq!(AddressError::NoCandidate.to_string(), "invalid mask excludes every address");
    assert_eq!(AddressError::RandomExhausted.to_string(), "no random address found");
    assert_eq!(AddressError::Reserved.to_string(), "address is reserved");
    assert_eq!(AddressError::NotPersisted.to_string(), "address not persisted");
}

#[test]
fn test_setcanaddress_frame_random_with_mask() {
    let mut p = make_parser_with(SeqRandom::new(&[4, 8]));
    send(&mut p, bl(BootloaderCmd::Broadcast, 0xF, &[]));
    send(
        &mut p,
        message::set_can_address_request(HOST, BOARD, 0xFF, Some(1 << 4)).unwrap(),
    );
    assert_eq!(p.can_address(), 8);
}

#[test]
fn test_polling_set_board_id_in_connected() {
    let mut p = connected();
    let frame = CanFrame::build(Clas::PollingMotorControl, 0x32, HOST, BOARD, &[12]).unwrap();
    assert!(send(&mut p, frame).is_empty());
    assert_eq!(p.can_address(), 12);
}

#[test]
fn test_polling_set_board_adx_random_ignores_mask() {
    let mut p = make_parser_with(SeqRandom::new(&[6]));
    send(&mut p, bl(BootloaderCmd::Broadcast, 0xF, &[]));
    let frame =
        CanFrame::build(Clas::PollingAnalogSensor, 0x32, HOST, BOARD, &[0xFF, 0xFF, 0xFF]).unwrap();
    send(&mut p, frame);
    assert_eq!(p.can_address(), 6);
}

// =============================================================================
// P5: countdown cancellation
// =============================================================================

#[test]
fn test_countdown_stopped_once() {
    let mut p = make_parser();
    send(&mut p, bl(BootloaderCmd::Broadcast, 0xF, &[]));
    send(&mut p, bl(BootloaderCmd::Broadcast, 0xF, &[]));
    send(&mut p, message::board_request(HOST, BOARD, false).unwrap());
    assert_eq!(p.context().countdown.stops, 1);
}

#[test]
fn test_ignored_but_admitted_frame_stops_countdown() {
    let mut p = make_parser();
    send(&mut p, bl(BootloaderCmd::Start, BOARD, &[]));
    assert_eq!(p.state(), State::Idle);
    assert_eq!(p.context().countdown.stops, 1);
}

#[test]
fn test_frames_after_end_do_not_stop_restart() {
    let mut p = updating(false);
    send(&mut p, message::end_request(HOST, BOARD).unwrap());
    send(&mut p, message::start_request(HOST, BOARD).unwrap());
    assert_eq!(p.context().countdown.stops, 1);
    assert_eq!(p.context().countdown.starts, vec![100]);
}

// =============================================================================
// P6: additional info
// =============================================================================

fn info_chunk(counter: u8) -> CanFrame {
    let b = 4 * counter;
    message::set_additional_info_request(HOST, BOARD, counter, [b, b + 1, b + 2, b + 3]).unwrap()
}

fn expected_info() -> [u8; 32] {
    core::array::from_fn(|i| i as u8)
}

#[test]
fn test_set_additional_info_in_order() {
    let mut p = connected();
    for counter in 0..8 {
        assert!(send(&mut p, info_chunk(counter)).is_empty());
    }
    assert_eq!(p.context().store.info.info32, expected_info());
    assert_eq!(p.context().store.sets, 1);
}

#[test]
fn test_set_additional_info_any_order() {
    let mut p = connected();
    for counter in [0, 6, 2, 7, 1, 5, 3] {
        send(&mut p, info_chunk(counter));
    }
    assert_eq!(p.context().store.sets, 0);
    send(&mut p, info_chunk(4));
    assert_eq!(p.context().store.info.info32, expected_info());
}

#[test]
fn test_set_additional_info_reverse_order_is_not_stored() {
    let mut p = connected();
    for counter in (0..8).rev() {
        assert!(send(&mut p, info_chunk(counter)).is_empty());
    }
    // counter 0 arrives last and drops chunks 7..1
    assert_eq!(p.context().store.sets, 0);
    assert_eq!(p.context().store.info.info32, [0; 32]);
}

#[test]
fn test_set_additional_info_zero_first_then_reverse() {
    let mut p = connected();
    send(&mut p, info_chunk(0));
    for counter in (1..8).rev() {
        send(&mut p, info_chunk(counter));
    }
    assert_eq!(p.context().store.sets, 1);
    assert_eq!(p.context().store.info.info32, expected_info());
}

#[test]
fn test_set_additional_info_counter_zero_resets() {
    let mut p = connected();
    for counter in 0..7 {
        send(&mut p, info_chunk(counter));
    }
    send(&mut p, info_chunk(0));
    send(&mut p, info_chunk(7));
    assert_eq!(p.context().store.sets, 0);
    assert_eq!(p.context().store.info.info32, [0; 32]);
}

#[test]
fn test_set_additional_info_counter_above_seven_ignored() {
    let mut p = connected();
    for counter in 0..7 {
        send(&mut p, info_chunk(counter));
    }
    let bogus = message::set_additional_info_request(HOST, BOARD, 8, [0xEE; 4]).unwrap();
    send(&mut p, bogus);
    assert_eq!(p.context().store.sets, 0);
    send(&mut p, info_chunk(7));
    assert_eq!(p.context().store.info.info32, expected_info());
}

#[test]
fn test_set_additional_info_keeps_address() {
    let mut p = connected();
    for counter in 0..8 {
        send(&mut p, info_chunk(counter));
    }
    assert_eq!(p.context().store.info.can_address, BOARD);
    assert_eq!(p.context().store.info.board_type, 11);
}

#[test]
fn test_get_additional_info_sends_eight_replies() {
    let mut p = connected();
    p.context_mut().store.info.info32 = expected_info();
    let replies = send(&mut p, message::get_additional_info_request(HOST, BOARD).unwrap());
    assert_eq!(replies.len(), 8);
    for (counter, reply) in replies.iter().enumerate() {
        let b = 4 * counter as u8;
        assert_eq!(reply.size, 6);
        assert_eq!(reply.sender(), BOARD);
        assert_eq!(reply.destination(), HOST);
        assert_eq!(reply.payload(), &[counter as u8, b, b + 1, b + 2, b + 3]);
    }
}

// =============================================================================
// Scenario A: discovery
// =============================================================================

#[test]
fn test_scenario_broadcast_in_idle() {
    let mut p = make_parser();
    let replies = send(&mut p, bl(BootloaderCmd::Broadcast, 0xF, &[]));

    assert_eq!(p.state(), State::Connected);
    assert_eq!(replies.len(), 1);
    let reply = replies[0];
    assert_eq!(reply.clas(), Clas::Bootloader);
    assert_eq!(reply.sender(), BOARD);
    assert_eq!(reply.destination(), HOST);
    assert_eq!(reply.size, 4);
    assert_eq!(reply.data[..4], [0xFF, 11, 1, 4]);
}

// =============================================================================
// Scenario B: one row
// =============================================================================

#[test]
fn test_scenario_sixteen_byte_row() {
    let mut p = updating(false);
    let image: Vec<u8> = (0x10..0x20).collect();

    send(&mut p, message::address_request(HOST, BOARD, 16, 0x0800_0000).unwrap());

    let first = message::data_request(HOST, BOARD, &image[0..7]).unwrap();
    let second = message::data_request(HOST, BOARD, &image[7..14]).unwrap();
    let last = message::data_request(HOST, BOARD, &image[14..16]).unwrap();
    assert_eq!(first.size, 8);
    assert_eq!(second.size, 8);

    assert!(send(&mut p, first).is_empty());
    assert!(send(&mut p, second).is_empty());
    let replies = send(&mut p, last);
    assert_ack(&replies, BootloaderCmd::Data);

    let adds = &p.context().programmer.adds;
    assert_eq!(adds[0].0, 0x0800_0000);
    assert_eq!(adds[1].0, 0x0800_0007);
    assert_eq!(adds[2].0, 0x0800_000E);
    assert_eq!(p.context().programmer.staged(), image);
}

#[test]
fn test_scenario_row_closed_by_two_full_frames() {
    let mut p = updating(false);
    send(&mut p, message::address_request(HOST, BOARD, 14, 0x0800_0000).unwrap());

    assert!(send(&mut p, message::data_request(HOST, BOARD, &[0xAA; 7]).unwrap()).is_empty());
    let replies = send(&mut p, message::data_request(HOST, BOARD, &[0xBB; 7]).unwrap());
    assert_ack(&replies, BootloaderCmd::Data);
    assert_eq!(p.context().programmer.staged().len(), 14);
}

// =============================================================================
// Scenario C: START
// =============================================================================

#[test]
fn test_scenario_start_with_erase_flag() {
    let mut p = updating(true);
    assert!(p.erase_appl_storage());

    let replies = send(&mut p, message::start_request(HOST, BOARD).unwrap());
    assert_ack(&replies, BootloaderCmd::Start);
    assert_eq!(p.context().programmer.flushes, 1);
    assert_eq!(p.context().store.user_data_erases, 1);
    assert!(!p.erase_appl_storage());

    // the flag is consumed
    send(&mut p, message::start_request(HOST, BOARD).unwrap());
    assert_eq!(p.context().programmer.flushes, 2);
    assert_eq!(p.context().store.user_data_erases, 1);
}

#[test]
fn test_start_without_erase_flag() {
    let mut p = updating(false);
    let replies = send(&mut p, message::start_request(HOST, BOARD).unwrap());
    assert_ack(&replies, BootloaderCmd::Start);
    assert_eq!(p.context().store.user_data_erases, 0);
}

#[test]
fn test_start_flush_failure_sends_no_ack() {
    let mut p = updating(true);
    p.context_mut().programmer.fail_flush = true;
    let replies = send(&mut p, message::start_request(HOST, BOARD).unwrap());
    assert!(replies.is_empty());
    assert_eq!(p.context().store.user_data_erases, 0);
}

// =============================================================================
// Scenario D: END
// =============================================================================

#[test]
fn test_scenario_end_arms_short_restart() {
    let mut p = updating(false);
    let replies = send(&mut p, message::end_request(HOST, BOARD).unwrap());
    assert_ack(&replies, BootloaderCmd::End);
    assert_eq!(p.context().countdown.starts, vec![100]);
    assert_eq!(p.state(), State::Updating);
}

#[test]
fn test_end_restart_delay_follows_config() {
    let mut p = updating(false);
    p.context_mut().config.restart_delay_ms = 250;
    send(&mut p, message::end_request(HOST, BOARD).unwrap());
    assert_eq!(p.context().countdown.starts, vec![250]);
}

// =============================================================================
// Full session
// =============================================================================

#[test]
fn test_full_update_session() {
    let mut p = make_parser();
    let image: Vec<u8> = (0..40u8).collect();

    send(&mut p, bl(BootloaderCmd::Broadcast, 0xF, &[]));
    send(&mut p, message::board_request(HOST, BOARD, false).unwrap());

    for (i, row) in image.chunks(16).enumerate() {
        let address = 0x1001_0000 + 16 * i as u32;
        send(
            &mut p,
            message::address_request(HOST, BOARD, row.len() as u8, address).unwrap(),
        );
        let mut acks = 0;
        for chunk in row.chunks(6) {
            let replies = send(&mut p, message::data_request(HOST, BOARD, chunk).unwrap());
            acks += replies.len();
        }
        assert_eq!(acks, 1, "row {}", i);
    }

    assert_ack(
        &send(&mut p, message::start_request(HOST, BOARD).unwrap()),
        BootloaderCmd::Start,
    );
    assert_ack(
        &send(&mut p, message::end_request(HOST, BOARD).unwrap()),
        BootloaderCmd::End,
    );

    assert_eq!(p.context().programmer.staged(), image);
    assert_eq!(p.context().countdown.stops, 1);
    assert_eq!(p.context().countdown.starts, vec![100]);
}
