// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Bootloader CAN protocol state machine.
//!
//! States:
//! - Idle: just booted, countdown running
//! - Connected: a host discovered us with BROADCAST
//! - Updating: BOARD received, ADDRESS/DATA rows then START and END
//!
//! [`CanParser::process`] is called once per received frame and fills the
//! replies to send back. Frames a state does not list are ignored: no reply,
//! no state change. Nothing is retried: the host detects a missing ack by
//! timeout.

use heapless::Vec;

use crate::board_info::BoardInfoStore;
use crate::config::BootConfig;
use crate::countdown::Countdown;
use crate::flash_burner::FlashProgrammer;
use crate::frame::{CanFrame, Clas};
use crate::message::{
    self, AddressRequest, AdditionalInfoAssembler, AdditionalInfoChunk, BoardRequest,
    SetCanAddressRequest, SetIdRequest,
};
use crate::protocol::{
    BootloaderCmd, FirmwareVersion, Process, ADDITIONAL_INFO_CHUNKS, ASPOLL_SET_BOARD_ADX,
    MCPOLL_SET_BOARD_ID, RANDOM_ADDRESS, RANDOM_ADDRESS_ATTEMPTS, RESERVED_ADDRESS_MASK,
};

/// Most replies a single frame can produce (GET_ADDITIONAL_INFO).
pub const MAX_REPLIES: usize = ADDITIONAL_INFO_CHUNKS as usize;

pub type Replies = Vec<CanFrame, MAX_REPLIES>;

/// Address of a row before any ADDRESS was received.
pub const INVALID_FLASH_ADDRESS: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    Idle,
    Connected,
    Updating,
}

/// Handler selected by [`route`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Action {
    Broadcast,
    Board,
    SetCanAddress,
    GetAdditionalInfo,
    SetAdditionalInfo,
    SetId,
    Address,
    Data,
    Start,
    End,
}

/// Transition table: the handler for `(state, class, command)`, if any.
pub fn route(state: State, clas: Clas, cmd: u8) -> Option<Action> {
    let bl = |c: BootloaderCmd| clas == Clas::Bootloader && cmd == c.code();

    match state {
        State::Idle => {
            if bl(BootloaderCmd::Broadcast) {
                Some(Action::Broadcast)
            } else if cmd == BootloaderCmd::Board.code() {
                // BOARD is matched on the command code alone in Idle
                Some(Action::Board)
            } else {
                None
            }
        }
        State::Connected => match clas {
            Clas::Bootloader => match BootloaderCmd::from_code(cmd)? {
                BootloaderCmd::Board => Some(Action::Board),
                BootloaderCmd::Broadcast => Some(Action::Broadcast),
                BootloaderCmd::SetCanAddress => Some(Action::SetCanAddress),
                BootloaderCmd::GetAdditionalInfo => Some(Action::GetAdditionalInfo),
                BootloaderCmd::SetAdditionalInfo => Some(Action::SetAdditionalInfo),
                _ => None,
            },
            Clas::PollingMotorControl if cmd == MCPOLL_SET_BOARD_ID => Some(Action::SetId),
            Clas::PollingAnalogSensor if cmd == ASPOLL_SET_BOARD_ADX => Some(Action::SetId),
            _ => None,
        },
        State::Updating => match clas {
            Clas::Bootloader => match BootloaderCmd::from_code(cmd)? {
                BootloaderCmd::Address => Some(Action::Address),
                BootloaderCmd::Data => Some(Action::Data),
                BootloaderCmd::Start => Some(Action::Start),
                BootloaderCmd::End => Some(Action::End),
                _ => None,
            },
            _ => None,
        },
    }
}

/// Source of pseudo-random numbers for address assignment.
pub trait RandomSource {
    fn next_u32(&mut self) -> u32;
}

/// Why a CAN address could not be assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressError {
    /// The invalid mask leaves no candidate.
    NoCandidate,
    /// No acceptable random value drawn within the attempt budget.
    RandomExhausted,
    /// 0 and 15 are never assigned.
    Reserved,
    /// The store did not keep the new value.
    NotPersisted,
}

impl core::fmt::Display for AddressError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NoCandidate => write!(f, "invalid mask excludes every address"),
            Self::RandomExhausted => write!(f, "no random address found"),
            Self::Reserved => write!(f, "address is reserved"),
            Self::NotPersisted => write!(f, "address not persisted"),
        }
    }
}

/// Everything the state machine acts on, owned by the parser.
pub struct BootContext<S, P, C, R> {
    pub store: S,
    pub programmer: P,
    pub countdown: C,
    pub random: R,
    pub config: BootConfig,
}

/// Row announced by the last ADDRESS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AddressRecord {
    pub address: u32,
    pub datalen: u8,
    pub received: u8,
}

impl AddressRecord {
    const fn invalid() -> Self {
        Self {
            address: INVALID_FLASH_ADDRESS,
            datalen: 0,
            received: 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.received == self.datalen
    }
}

pub struct CanParser<S, P, C, R> {
    ctx: BootContext<S, P, C, R>,
    state: State,
    countdown_is_active: bool,
    can_address: u8,
    row: AddressRecord,
    erase_appl_storage: bool,
    info: AdditionalInfoAssembler,
}

impl<S, P, C, R> CanParser<S, P, C, R>
where
    S: BoardInfoStore,
    P: FlashProgrammer,
    C: Countdown,
    R: RandomSource,
{
    /// Create the parser in Idle with the stored CAN address.
    ///
    /// The countdown is assumed armed: the first accepted frame stops it.
    pub fn new(mut ctx: BootContext<S, P, C, R>) -> Self {
        let can_address = ctx.store.can_address();
        Self {
            ctx,
            state: State::Idle,
            countdown_is_active: true,
            can_address,
            row: AddressRecord::invalid(),
            erase_appl_storage: false,
            info: AdditionalInfoAssembler::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn can_address(&self) -> u8 {
        self.can_address
    }

    pub fn row(&self) -> AddressRecord {
        self.row
    }

    pub fn erase_appl_storage(&self) -> bool {
        self.erase_appl_storage
    }

    pub fn context(&self) -> &BootContext<S, P, C, R> {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut BootContext<S, P, C, R> {
        &mut self.ctx
    }

    fn set_state(&mut self, state: State) {
        if state != self.state {
            trace!("parser: {} -> {}", self.state, state);
        }
        self.state = state;
    }

    /// Handle one frame. Returns true if `replies` holds frames to transmit.
    pub fn process(&mut self, frame: &CanFrame, replies: &mut Replies) -> bool {
        replies.clear();

        if !frame.is_for_board(self.can_address) {
            return false;
        }

        if self.countdown_is_active {
            self.ctx.countdown.stop_countdown();
            self.countdown_is_active = false;
            trace!("parser: countdown stopped");
        }

        let clas = frame.clas();
        let cmd = frame.cmd();

        let Some(action) = route(self.state, clas, cmd) else {
            return false;
        };

        match action {
            Action::Broadcast => {
                self.on_broadcast(frame, replies);
                if self.state == State::Idle {
                    self.set_state(State::Connected);
                }
            }
            Action::Board => {
                self.on_board(frame, replies);
                self.set_state(State::Updating);
            }
            Action::SetCanAddress => self.on_set_can_address(frame),
            Action::GetAdditionalInfo => self.on_get_additional_info(frame, replies),
            Action::SetAdditionalInfo => self.on_set_additional_info(frame),
            Action::SetId => self.on_set_id(frame),
            Action::Address => self.on_address(frame),
            Action::Data => self.on_data(frame, replies),
            Action::Start => self.on_start(frame, replies),
            Action::End => {
                self.on_end(frame, replies);
                // restart later so that the ack is on the bus before the reset
                let delay = self.ctx.config.restart_delay_ms;
                self.ctx.countdown.start_countdown(delay);
                trace!("parser: restart in {} ms", delay);
            }
        }

        !replies.is_empty()
    }

    fn push(replies: &mut Replies, reply: Option<CanFrame>) {
        if let Some(reply) = reply {
            // capacity covers the largest burst
            let _ = replies.push(reply);
        }
    }

    fn on_broadcast(&mut self, frame: &CanFrame, replies: &mut Replies) {
        let info = self.ctx.store.get();
        let firmware = FirmwareVersion {
            major: info.bootloader.major,
            minor: info.bootloader.minor,
            build: 255,
        };
        Self::push(
            replies,
            message::broadcast_reply(
                self.can_address,
                frame.sender(),
                info.board_type,
                firmware,
                Process::Bootloader,
            ),
        );
    }

    fn on_board(&mut self, frame: &CanFrame, replies: &mut Replies) {
        let msg = BoardRequest::load(frame);
        // storage is erased later, on START
        self.erase_appl_storage = msg.erase_eeprom;
        Self::push(replies, message::board_reply(self.can_address, frame.sender()));
    }

    fn on_address(&mut self, frame: &CanFrame) {
        let msg = AddressRequest::load(frame);
        self.row = AddressRecord {
            address: msg.address,
            datalen: msg.datalen,
            received: 0,
        };
    }

    fn on_data(&mut self, frame: &CanFrame, replies: &mut Replies) {
        let data = frame.payload();
        let received = self.row.received as usize + data.len();
        if received > self.row.datalen as usize {
            // more than the row declared: no ack, no nack
            return;
        }

        let address = self.row.address.wrapping_add(self.row.received as u32);
        if let Err(_e) = self.ctx.programmer.add(address, data) {
            trace!("parser: flash add failed: {}", _e);
            return;
        }

        self.row.received = received as u8;
        if self.row.is_complete() {
            Self::push(
                replies,
                message::ack_reply(BootloaderCmd::Data, self.can_address, frame.sender(), true),
            );
        }
    }

    fn on_start(&mut self, frame: &CanFrame, replies: &mut Replies) {
        if let Err(_e) = self.ctx.programmer.flush() {
            trace!("parser: flash flush failed: {}", _e);
            return;
        }

        if self.erase_appl_storage {
            self.erase_appl_storage = false;
            if let Err(_e) = self.ctx.store.erase_user_data() {
                trace!("parser: user data erase failed: {}", _e);
                return;
            }
        }

        Self::push(
            replies,
            message::ack_reply(BootloaderCmd::Start, self.can_address, frame.sender(), true),
        );
    }

    fn on_end(&mut self, frame: &CanFrame, replies: &mut Replies) {
        Self::push(
            replies,
            message::ack_reply(BootloaderCmd::End, self.can_address, frame.sender(), true),
        );
    }

    fn on_get_additional_info(&mut self, frame: &CanFrame, replies: &mut Replies) {
        let info = self.ctx.store.get();
        for counter in 0..ADDITIONAL_INFO_CHUNKS {
            Self::push(
                replies,
                message::additional_info_reply(
                    self.can_address,
                    frame.sender(),
                    counter,
                    &info.info32,
                ),
            );
        }
    }

    fn on_set_additional_info(&mut self, frame: &CanFrame) {
        let Some(chunk) = AdditionalInfoChunk::load(frame) else {
            return;
        };
        if let Some(block) = self.info.push(&chunk) {
            let mut info = self.ctx.store.get();
            info.info32 = block;
            if let Err(_e) = self.ctx.store.set(&info) {
                trace!("parser: additional info not stored: {}", _e);
            }
        }
    }

    fn on_set_id(&mut self, frame: &CanFrame) {
        let msg = SetIdRequest::load(frame);
        if let Err(_e) = self.set_can_address(msg.address, 0x0000) {
            trace!("parser: board id not changed: {}", _e);
        }
    }

    fn on_set_can_address(&mut self, frame: &CanFrame) {
        let msg = SetCanAddressRequest::load(frame);
        if let Err(_e) = self.set_can_address(msg.address, msg.random_invalid_mask) {
            trace!("parser: address not changed: {}", _e);
        }
    }

    /// Assign a new CAN address, or a random one for [`RANDOM_ADDRESS`].
    ///
    /// Random candidates avoid the bits set in `random_invalid_mask`; 0 and 15
    /// are always excluded. On success the stored address equals the returned
    /// one.
    pub fn set_can_address(
        &mut self,
        address: u8,
        random_invalid_mask: u16,
    ) -> Result<u8, AddressError> {
        // the stored value is authoritative here
        self.can_address = self.ctx.store.can_address();

        let mut target = address;

        if address == RANDOM_ADDRESS {
            let mask = random_invalid_mask | RESERVED_ADDRESS_MASK;
            if mask == 0xFFFF {
                return Err(AddressError::NoCandidate);
            }

            let found = (0..RANDOM_ADDRESS_ATTEMPTS)
                .map(|_| (self.ctx.random.next_u32() & 0xF) as u8)
                .find(|&candidate| (mask & (1 << candidate)) == 0);

            target = found.ok_or(AddressError::RandomExhausted)?;
        }

        if target == 0 || target == 0xF {
            return Err(AddressError::Reserved);
        }

        if self.can_address != target {
            if let Err(_e) = self.ctx.store.set_can_address(target) {
                trace!("parser: address store failed: {}", _e);
            }
            self.can_address = self.ctx.store.can_address();
            trace!("parser: can address now {}", self.can_address);
        }

        if target == self.can_address {
            Ok(target)
        } else {
            Err(AddressError::NotPersisted)
        }
    }
}
