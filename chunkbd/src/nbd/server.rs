//! NBD 服务端：监听、握手协商与 transmission 循环。

use super::proto::*;
use crate::chuck::store::ChunkStore;
use crate::device::{BlockDevice, DeviceHandle, ZeroFlags};
use crate::error::{DeviceResult, NbdError};
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

pub struct NbdServer<S: ChunkStore> {
    device: Arc<BlockDevice<S>>,
    export_name: String,
    read_only: bool,
}

impl<S: ChunkStore> Clone for NbdServer<S> {
    fn clone(&self) -> Self {
        Self {
            device: self.device.clone(),
            export_name: self.export_name.clone(),
            read_only: self.read_only,
        }
    }
}

impl<S: ChunkStore + 'static> NbdServer<S> {
    pub fn new(device: Arc<BlockDevice<S>>, export_name: impl Into<String>, read_only: bool) -> Self {
        Self {
            device,
            export_name: export_name.into(),
            read_only,
        }
    }

    fn transmission_flags(&self) -> u16 {
        let mut flags = FLAG_HAS_FLAGS | FLAG_SEND_FLUSH | FLAG_SEND_FUA;
        if self.read_only {
            flags |= FLAG_READ_ONLY;
        } else {
            flags |= FLAG_SEND_WRITE_ZEROES;
        }
        flags
    }

    /// 接受连接直到 `shutdown` 完成；每个连接一个任务。
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), NbdError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("nbd server shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(%peer, "set_nodelay failed: {e}");
                    }
                    let server = self.clone();
                    tokio::spawn(async move {
                        info!(%peer, "client connected");
                        match server.handle_connection(stream).await {
                            Ok(()) => info!(%peer, "client disconnected"),
                            Err(e) => warn!(%peer, "connection closed: {e}"),
                        }
                    });
                }
            }
        }
    }

    /// 处理一个客户端连接：握手成功后打开设备句柄，断开时关闭。
    pub async fn handle_connection<T>(&self, mut stream: T) -> Result<(), NbdError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        if !self.handshake(&mut stream).await? {
            return Ok(());
        }
        let handle = self.device.open(self.read_only);
        let res = self.transmission(&mut stream, handle).await;
        self.device.close(handle);
        res
    }

    /// 返回 false 表示客户端在协商阶段主动放弃。
    async fn handshake<T>(&self, stream: &mut T) -> Result<bool, NbdError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        stream.write_u64(NBD_MAGIC).await?;
        stream.write_u64(IHAVEOPT).await?;
        stream
            .write_u16(FLAG_FIXED_NEWSTYLE | FLAG_NO_ZEROES)
            .await?;
        stream.flush().await?;

        let client_flags = stream.read_u32().await?;
        if client_flags & !(FLAG_C_FIXED_NEWSTYLE | FLAG_C_NO_ZEROES) != 0 {
            return Err(NbdError::Protocol(format!(
                "unknown client flags {client_flags:#x}"
            )));
        }
        let no_zeroes = client_flags & FLAG_C_NO_ZEROES != 0;
        let size = self.device.size();
        let tflags = self.transmission_flags();

        loop {
            let magic = stream.read_u64().await?;
            if magic != IHAVEOPT {
                return Err(NbdError::Protocol(format!("bad option magic {magic:#x}")));
            }
            let option = stream.read_u32().await?;
            let len = stream.read_u32().await?;
            if len > MAX_OPTION_LEN {
                return Err(NbdError::Protocol(format!("option {option} too long ({len})")));
            }
            let mut data = vec![0u8; len as usize];
            stream.read_exact(&mut data).await?;

            match option {
                OPT_EXPORT_NAME => {
                    debug!(name = %String::from_utf8_lossy(&data), "export name");
                    stream.write_u64(size).await?;
                    stream.write_u16(tflags).await?;
                    if !no_zeroes {
                        stream.write_all(&[0u8; 124]).await?;
                    }
                    stream.flush().await?;
                    return Ok(true);
                }
                OPT_ABORT => {
                    write_option_reply(stream, option, REP_ACK, &[]).await?;
                    return Ok(false);
                }
                OPT_LIST => {
                    if !data.is_empty() {
                        write_option_reply(stream, option, REP_ERR_INVALID, &[]).await?;
                        continue;
                    }
                    let name = self.export_name.as_bytes();
                    let mut payload = Vec::with_capacity(4 + name.len());
                    payload.extend_from_slice(&(name.len() as u32).to_be_bytes());
                    payload.extend_from_slice(name);
                    write_option_reply(stream, option, REP_SERVER, &payload).await?;
                    write_option_reply(stream, option, REP_ACK, &[]).await?;
                }
                OPT_INFO | OPT_GO => {
                    let Some((name, infos)) = parse_info_request(&data) else {
                        write_option_reply(stream, option, REP_ERR_INVALID, &[]).await?;
                        continue;
                    };
                    debug!(%name, ?infos, go = option == OPT_GO, "export info");
                    write_option_reply(stream, option, REP_INFO, &info_export(size, tflags)).await?;
                    write_option_reply(stream, option, REP_ACK, &[]).await?;
                    if option == OPT_GO {
                        return Ok(true);
                    }
                }
                other => {
                    debug!(option = other, "unsupported option");
                    write_option_reply(stream, other, REP_ERR_UNSUP, &[]).await?;
                }
            }
        }
    }

    async fn transmission<T>(&self, stream: &mut T, handle: DeviceHandle) -> Result<(), NbdError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        while let Some(req) = read_request(stream).await? {
            match req.kind {
                CMD_READ => {
                    if req.length > MAX_REQUEST_LEN {
                        write_simple_reply(stream, libc::EINVAL as u32, req.cookie, &[]).await?;
                        continue;
                    }
                    match self.device.read(handle, req.offset, req.length as usize).await {
                        Ok(data) => write_simple_reply(stream, 0, req.cookie, &data).await?,
                        Err(e) => write_simple_reply(stream, e.errno() as u32, req.cookie, &[]).await?,
                    }
                }
                CMD_WRITE => {
                    // 无法跳过过大的载荷，只能断开
                    if req.length > MAX_REQUEST_LEN {
                        return Err(NbdError::Protocol(format!(
                            "write of {} bytes exceeds limit",
                            req.length
                        )));
                    }
                    let mut data = vec![0u8; req.length as usize];
                    stream.read_exact(&mut data).await?;
                    let res = self.device.write(handle, req.offset, &data).await;
                    reply_status(stream, req.cookie, res).await?;
                }
                CMD_WRITE_ZEROES => {
                    let flags = ZeroFlags {
                        may_trim: req.flags & CMD_FLAG_NO_HOLE == 0,
                        fua: req.flags & CMD_FLAG_FUA != 0,
                    };
                    let res = self
                        .device
                        .zero(handle, req.offset, req.length as u64, flags)
                        .await;
                    reply_status(stream, req.cookie, res).await?;
                }
                CMD_FLUSH => {
                    let res = self.device.flush(handle).await;
                    reply_status(stream, req.cookie, res).await?;
                }
                CMD_DISC => {
                    debug!(handle = handle.id(), "client requested disconnect");
                    return Ok(());
                }
                other => {
                    if other == CMD_TRIM {
                        debug!("trim is not advertised");
                    }
                    warn!(command = other, "unsupported command");
                    write_simple_reply(stream, libc::EINVAL as u32, req.cookie, &[]).await?;
                }
            }
        }
        Ok(())
    }
}

async fn reply_status<W: AsyncWrite + Unpin>(
    w: &mut W,
    cookie: u64,
    res: DeviceResult<()>,
) -> Result<(), NbdError> {
    let error = match res {
        Ok(()) => 0,
        Err(e) => e.errno() as u32,
    };
    write_simple_reply(w, error, cookie, &[]).await
}
