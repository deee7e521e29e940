//! NBD 协议常量与报文编解码（固定 newstyle 握手 + simple reply）。

use crate::error::NbdError;
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const NBD_MAGIC: u64 = 0x4e42_444d_4147_4943; // "NBDMAGIC"
pub const IHAVEOPT: u64 = 0x4948_4156_454f_5054; // "IHAVEOPT"
pub const OPTION_REPLY_MAGIC: u64 = 0x0003_e889_0455_65a9;
pub const REQUEST_MAGIC: u32 = 0x2560_9513;
pub const SIMPLE_REPLY_MAGIC: u32 = 0x6744_6698;

// handshake flags
pub const FLAG_FIXED_NEWSTYLE: u16 = 1 << 0;
pub const FLAG_NO_ZEROES: u16 = 1 << 1;

// client flags
pub const FLAG_C_FIXED_NEWSTYLE: u32 = 1 << 0;
pub const FLAG_C_NO_ZEROES: u32 = 1 << 1;

// transmission flags
pub const FLAG_HAS_FLAGS: u16 = 1 << 0;
pub const FLAG_READ_ONLY: u16 = 1 << 1;
pub const FLAG_SEND_FLUSH: u16 = 1 << 2;
pub const FLAG_SEND_FUA: u16 = 1 << 3;
pub const FLAG_SEND_WRITE_ZEROES: u16 = 1 << 6;

// options
pub const OPT_EXPORT_NAME: u32 = 1;
pub const OPT_ABORT: u32 = 2;
pub const OPT_LIST: u32 = 3;
pub const OPT_INFO: u32 = 6;
pub const OPT_GO: u32 = 7;

// option replies
pub const REP_ACK: u32 = 1;
pub const REP_SERVER: u32 = 2;
pub const REP_INFO: u32 = 3;
pub const REP_ERR_UNSUP: u32 = (1 << 31) + 1;
pub const REP_ERR_INVALID: u32 = (1 << 31) + 3;

pub const INFO_EXPORT: u16 = 0;

// commands
pub const CMD_READ: u16 = 0;
pub const CMD_WRITE: u16 = 1;
pub const CMD_DISC: u16 = 2;
pub const CMD_FLUSH: u16 = 3;
pub const CMD_TRIM: u16 = 4;
pub const CMD_WRITE_ZEROES: u16 = 6;

// command flags
pub const CMD_FLAG_FUA: u16 = 1 << 0;
pub const CMD_FLAG_NO_HOLE: u16 = 1 << 1;

/// 单个请求允许的最大数据量。
pub const MAX_REQUEST_LEN: u32 = 32 * 1024 * 1024;
/// 握手阶段单个 option 的最大数据量。
pub const MAX_OPTION_LEN: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub flags: u16,
    pub kind: u16,
    pub cookie: u64,
    pub offset: u64,
    pub length: u32,
}

/// 读取一个 transmission 请求头；对端正常断开时返回 `None`。
pub async fn read_request<R: AsyncRead + Unpin>(r: &mut R) -> Result<Option<Request>, NbdError> {
    let magic = match r.read_u32().await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if magic != REQUEST_MAGIC {
        return Err(NbdError::Protocol(format!("bad request magic {magic:#x}")));
    }
    Ok(Some(Request {
        flags: r.read_u16().await?,
        kind: r.read_u16().await?,
        cookie: r.read_u64().await?,
        offset: r.read_u64().await?,
        length: r.read_u32().await?,
    }))
}

pub async fn write_simple_reply<W: AsyncWrite + Unpin>(
    w: &mut W,
    error: u32,
    cookie: u64,
    data: &[u8],
) -> Result<(), NbdError> {
    let mut buf = BytesMut::with_capacity(16 + data.len());
    buf.put_u32(SIMPLE_REPLY_MAGIC);
    buf.put_u32(error);
    buf.put_u64(cookie);
    buf.put_slice(data);
    w.write_all(&buf).await?;
    w.flush().await?;
    Ok(())
}

pub async fn write_option_reply<W: AsyncWrite + Unpin>(
    w: &mut W,
    option: u32,
    reply: u32,
    data: &[u8],
) -> Result<(), NbdError> {
    let mut buf = BytesMut::with_capacity(20 + data.len());
    buf.put_u64(OPTION_REPLY_MAGIC);
    buf.put_u32(option);
    buf.put_u32(reply);
    buf.put_u32(data.len() as u32);
    buf.put_slice(data);
    w.write_all(&buf).await?;
    w.flush().await?;
    Ok(())
}

/// `NBD_INFO_EXPORT` 载荷：类型、设备大小、transmission flags。
pub fn info_export(size: u64, flags: u16) -> BytesMut {
    let mut buf = BytesMut::with_capacity(12);
    buf.put_u16(INFO_EXPORT);
    buf.put_u64(size);
    buf.put_u16(flags);
    buf
}

/// 解析 `NBD_OPT_INFO` / `NBD_OPT_GO` 的数据：导出名与请求的 info 类型。
pub fn parse_info_request(data: &[u8]) -> Option<(String, Vec<u16>)> {
    let name_len = u32::from_be_bytes(data.get(..4)?.try_into().ok()?) as usize;
    let name_end = 4usize.checked_add(name_len)?;
    let name = String::from_utf8(data.get(4..name_end)?.to_vec()).ok()?;
    let count = u16::from_be_bytes(data.get(name_end..name_end + 2)?.try_into().ok()?) as usize;
    let rest = data.get(name_end + 2..)?;
    if rest.len() != count * 2 {
        return None;
    }
    let infos = rest
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();
    Some((name, infos))
}
