use crate::entities::mobile::{MobileKind, VendorKind};
use crate::entities::serial::Serial;
use crate::net::wire::{WireReader, WireWriter};
use crate::world::position::Direction;
use crate::world::region::RegionId;

/// Round-trip counter for staged interactions. It rides inside the
/// message itself; the server keeps no per-conversation state, so a flow
/// resumes from whatever stage the client sends back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    One,
    Two,
    Three,
    Four,
}

impl Stage {
    pub fn next(self) -> Stage {
        match self {
            Stage::One => Stage::Two,
            Stage::Two => Stage::Three,
            Stage::Three => Stage::Four,
            Stage::Four => Stage::Four,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Stage::One => 1,
            Stage::Two => 2,
            Stage::Three => 3,
            Stage::Four => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Stage> {
        match code {
            1 => Some(Stage::One),
            2 => Some(Stage::Two),
            3 => Some(Stage::Three),
            4 => Some(Stage::Four),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoReason {
    Paperdoll,
    Location,
    Equipment,
    Items,
    Vendors,
    Npcs,
}

impl InfoReason {
    pub fn code(self) -> u8 {
        match self {
            InfoReason::Paperdoll => 0,
            InfoReason::Location => 1,
            InfoReason::Equipment => 2,
            InfoReason::Items => 3,
            InfoReason::Vendors => 4,
            InfoReason::Npcs => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(InfoReason::Paperdoll),
            1 => Some(InfoReason::Location),
            2 => Some(InfoReason::Equipment),
            3 => Some(InfoReason::Items),
            4 => Some(InfoReason::Vendors),
            5 => Some(InfoReason::Npcs),
            _ => None,
        }
    }
}

/// Domain-validation refusals, distinguishable from generic protocol
/// errors so a client can recover (relocate, re-list, retry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    NotLoggedIn,
    UnknownMobile,
    DeadMobile,
    TargetGone,
    OutOfRange,
    UnknownRegion,
    NotConnected,
    RegionLocked,
    UnknownItem,
    NotOwner,
    InsufficientFunds,
    NotDead,
    UnknownVendor,
    UnknownWare,
}

impl Refusal {
    pub fn code(self) -> u8 {
        match self {
            Refusal::NotLoggedIn => 0,
            Refusal::UnknownMobile => 1,
            Refusal::DeadMobile => 2,
            Refusal::TargetGone => 3,
            Refusal::OutOfRange => 4,
            Refusal::UnknownRegion => 5,
            Refusal::NotConnected => 6,
            Refusal::RegionLocked => 7,
            Refusal::UnknownItem => 8,
            Refusal::NotOwner => 9,
            Refusal::InsufficientFunds => 10,
            Refusal::NotDead => 11,
            Refusal::UnknownVendor => 12,
            Refusal::UnknownWare => 13,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Refusal::NotLoggedIn),
            1 => Some(Refusal::UnknownMobile),
            2 => Some(Refusal::DeadMobile),
            3 => Some(Refusal::TargetGone),
            4 => Some(Refusal::OutOfRange),
            5 => Some(Refusal::UnknownRegion),
            6 => Some(Refusal::NotConnected),
            7 => Some(Refusal::RegionLocked),
            8 => Some(Refusal::UnknownItem),
            9 => Some(Refusal::NotOwner),
            10 => Some(Refusal::InsufficientFunds),
            11 => Some(Refusal::NotDead),
            12 => Some(Refusal::UnknownVendor),
            13 => Some(Refusal::UnknownWare),
            _ => None,
        }
    }
}

/// The lightweight mobile tag inside the session snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MobileTag {
    pub kind: MobileKind,
    pub serial: Serial,
    pub name: String,
}

/// Public face of a region: enough for a client to render travel choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionDescriptor {
    pub id: RegionId,
    pub connections: u64,
    pub navigable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub player_id: u64,
    pub mobile: MobileTag,
    pub region: RegionDescriptor,
    pub unlocked: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    Authenticate { player_id: u64, name: String },
    Ok { text: String },
    Error { text: String },
    Refused { reason: Refusal, text: String },
    Kill { reason: Option<String> },
    AccountClientState { snapshot: SessionSnapshot },
    GetInfo { reason: InfoReason },
    Combat { targets: Vec<Serial> },
    Move { direction: Option<Direction>, destination: Option<RegionId> },
    Resurrect,
    UseItem { item: Serial },
    UseVendor { vendor: VendorKind, ware: u32, confirm: bool },
}

const OP_AUTHENTICATE: u8 = 0x01;
const OP_OK: u8 = 0x02;
const OP_ERROR: u8 = 0x03;
const OP_REFUSED: u8 = 0x04;
const OP_KILL: u8 = 0x05;
const OP_ACCOUNT_CLIENT_STATE: u8 = 0x06;
const OP_GET_INFO: u8 = 0x07;
const OP_COMBAT: u8 = 0x08;
const OP_MOVE: u8 = 0x09;
const OP_RESURRECT: u8 = 0x0a;
const OP_USE_ITEM: u8 = 0x0b;
const OP_USE_VENDOR: u8 = 0x0c;

/// One wire exchange: originating player, stage counter, typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub player_id: u64,
    pub stage: Stage,
    pub kind: MessageKind,
}

#[derive(Debug, PartialEq, Eq)]
pub struct MessageDecodeError {
    pub message: String,
}

impl std::fmt::Display for MessageDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

fn truncated(what: &str) -> MessageDecodeError {
    MessageDecodeError {
        message: format!("message truncated reading {what}"),
    }
}

impl Message {
    pub fn new(player_id: u64, stage: Stage, kind: MessageKind) -> Self {
        Self {
            player_id,
            stage,
            kind,
        }
    }

    /// A first-stage request, the shape a client opens every flow with.
    pub fn request(player_id: u64, kind: MessageKind) -> Self {
        Self::new(player_id, Stage::One, kind)
    }

    pub fn opcode(&self) -> u8 {
        match &self.kind {
            MessageKind::Authenticate { .. } => OP_AUTHENTICATE,
            MessageKind::Ok { .. } => OP_OK,
            MessageKind::Error { .. } => OP_ERROR,
            MessageKind::Refused { .. } => OP_REFUSED,
            MessageKind::Kill { .. } => OP_KILL,
            MessageKind::AccountClientState { .. } => OP_ACCOUNT_CLIENT_STATE,
            MessageKind::GetInfo { .. } => OP_GET_INFO,
            MessageKind::Combat { .. } => OP_COMBAT,
            MessageKind::Move { .. } => OP_MOVE,
            MessageKind::Resurrect => OP_RESURRECT,
            MessageKind::UseItem { .. } => OP_USE_ITEM,
            MessageKind::UseVendor { .. } => OP_USE_VENDOR,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut writer = WireWriter::new();
        writer.write_u8(self.opcode());
        writer.write_u64(self.player_id);
        writer.write_u8(self.stage.code());
        match &self.kind {
            MessageKind::Authenticate { player_id, name } => {
                writer.write_u64(*player_id);
                writer.write_string(name);
            }
            MessageKind::Ok { text } | MessageKind::Error { text } => {
                writer.write_string(text);
            }
            MessageKind::Refused { reason, text } => {
                writer.write_u8(reason.code());
                writer.write_string(text);
            }
            MessageKind::Kill { reason } => match reason {
                Some(text) => {
                    writer.write_bool(true);
                    writer.write_string(text);
                }
                None => writer.write_bool(false),
            },
            MessageKind::AccountClientState { snapshot } => {
                writer.write_u64(snapshot.player_id);
                writer.write_u8(snapshot.mobile.kind.code());
                writer.write_u32(snapshot.mobile.serial.0);
                writer.write_string(&snapshot.mobile.name);
                writer.write_u64(snapshot.region.id.0);
                writer.write_u64(snapshot.region.connections);
                writer.write_bool(snapshot.region.navigable);
                writer.write_u64(snapshot.unlocked);
            }
            MessageKind::GetInfo { reason } => {
                writer.write_u8(reason.code());
            }
            MessageKind::Combat { targets } => {
                writer.write_list_len(targets.len());
                for target in targets {
                    writer.write_u32(target.0);
                }
            }
            MessageKind::Move {
                direction,
                destination,
            } => {
                match direction {
                    Some(direction) => {
                        writer.write_bool(true);
                        writer.write_u8(direction.code());
                    }
                    None => writer.write_bool(false),
                }
                match destination {
                    Some(region) => {
                        writer.write_bool(true);
                        writer.write_u64(region.0);
                    }
                    None => writer.write_bool(false),
                }
            }
            MessageKind::Resurrect => {}
            MessageKind::UseItem { item } => {
                writer.write_u32(item.0);
            }
            MessageKind::UseVendor {
                vendor,
                ware,
                confirm,
            } => {
                writer.write_u8(vendor.code());
                writer.write_u32(*ware);
                writer.write_bool(*confirm);
            }
        }
        writer.into_vec()
    }

    pub fn decode(data: &[u8]) -> Result<Message, MessageDecodeError> {
        let mut reader = WireReader::new(data);
        let opcode = reader.read_u8().ok_or_else(|| truncated("opcode"))?;
        let player_id = reader.read_u64().ok_or_else(|| truncated("player id"))?;
        let stage_code = reader.read_u8().ok_or_else(|| truncated("stage"))?;
        let stage = Stage::from_code(stage_code).ok_or(MessageDecodeError {
            message: format!("unknown stage {stage_code}"),
        })?;

        let kind = match opcode {
            OP_AUTHENTICATE => MessageKind::Authenticate {
                player_id: reader.read_u64().ok_or_else(|| truncated("account id"))?,
                name: reader.read_string().ok_or_else(|| truncated("name"))?,
            },
            OP_OK => MessageKind::Ok {
                text: reader.read_string().ok_or_else(|| truncated("text"))?,
            },
            OP_ERROR => MessageKind::Error {
                text: reader.read_string().ok_or_else(|| truncated("text"))?,
            },
            OP_REFUSED => {
                let code = reader.read_u8().ok_or_else(|| truncated("refusal"))?;
                let reason = Refusal::from_code(code).ok_or(MessageDecodeError {
                    message: format!("unknown refusal {code}"),
                })?;
                MessageKind::Refused {
                    reason,
                    text: reader.read_string().ok_or_else(|| truncated("text"))?,
                }
            }
            OP_KILL => {
                let present = reader.read_bool().ok_or_else(|| truncated("kill flag"))?;
                let reason = if present {
                    Some(reader.read_string().ok_or_else(|| truncated("reason"))?)
                } else {
                    None
                };
                MessageKind::Kill { reason }
            }
            OP_ACCOUNT_CLIENT_STATE => {
                let snapshot_player = reader.read_u64().ok_or_else(|| truncated("player id"))?;
                let kind_code = reader.read_u8().ok_or_else(|| truncated("mobile kind"))?;
                let mobile_kind = MobileKind::from_code(kind_code).ok_or(MessageDecodeError {
                    message: format!("unknown mobile kind {kind_code}"),
                })?;
                let serial = Serial(reader.read_u32().ok_or_else(|| truncated("serial"))?);
                let name = reader.read_string().ok_or_else(|| truncated("name"))?;
                let region = RegionId(reader.read_u64().ok_or_else(|| truncated("region"))?);
                let connections = reader.read_u64().ok_or_else(|| truncated("connections"))?;
                let navigable = reader.read_bool().ok_or_else(|| truncated("navigable"))?;
                let unlocked = reader.read_u64().ok_or_else(|| truncated("unlocked"))?;
                MessageKind::AccountClientState {
                    snapshot: SessionSnapshot {
                        player_id: snapshot_player,
                        mobile: MobileTag {
                            kind: mobile_kind,
                            serial,
                            name,
                        },
                        region: RegionDescriptor {
                            id: region,
                            connections,
                            navigable,
                        },
                        unlocked,
                    },
                }
            }
            OP_GET_INFO => {
                let code = reader.read_u8().ok_or_else(|| truncated("info reason"))?;
                MessageKind::GetInfo {
                    reason: InfoReason::from_code(code).ok_or(MessageDecodeError {
                        message: format!("unknown info reason {code}"),
                    })?,
                }
            }
            OP_COMBAT => {
                let len = reader.read_list_len().ok_or_else(|| truncated("target list"))?;
                let mut targets = Vec::with_capacity(len);
                for _ in 0..len {
                    targets.push(Serial(reader.read_u32().ok_or_else(|| truncated("target"))?));
                }
                MessageKind::Combat { targets }
            }
            OP_MOVE => {
                let has_direction =
                    reader.read_bool().ok_or_else(|| truncated("direction flag"))?;
                let direction = if has_direction {
                    let code = reader.read_u8().ok_or_else(|| truncated("direction"))?;
                    Some(Direction::from_code(code).ok_or(MessageDecodeError {
                        message: format!("unknown direction {code}"),
                    })?)
                } else {
                    None
                };
                let has_destination =
                    reader.read_bool().ok_or_else(|| truncated("destination flag"))?;
                let destination = if has_destination {
                    Some(RegionId(
                        reader.read_u64().ok_or_else(|| truncated("destination"))?,
                    ))
                } else {
                    None
                };
                MessageKind::Move {
                    direction,
                    destination,
                }
            }
            OP_RESURRECT => MessageKind::Resurrect,
            OP_USE_ITEM => MessageKind::UseItem {
                item: Serial(reader.read_u32().ok_or_else(|| truncated("item"))?),
            },
            OP_USE_VENDOR => {
                let vendor_code = reader.read_u8().ok_or_else(|| truncated("vendor"))?;
                let vendor = VendorKind::from_code(vendor_code).ok_or(MessageDecodeError {
                    message: format!("unknown vendor kind {vendor_code}"),
                })?;
                MessageKind::UseVendor {
                    vendor,
                    ware: reader.read_u32().ok_or_else(|| truncated("ware"))?,
                    confirm: reader.read_bool().ok_or_else(|| truncated("confirm"))?,
                }
            }
            other => {
                return Err(MessageDecodeError {
                    message: format!("unknown message opcode 0x{other:02x}"),
                })
            }
        };

        Ok(Message {
            player_id,
            stage,
            kind,
        })
    }
}
