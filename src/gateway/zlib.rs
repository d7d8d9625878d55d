use flate2::{Decompress, FlushDecompress, Status};

use crate::gateway::GatewayError;

/// zlib-streamの各メッセージの終端
pub const ZLIB_FLUSH_SUFFIX: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// 接続全体で1つのzlibコンテキストを共有するストリーム展開器
#[derive(Debug)]
pub struct ZlibStream {
    buffer: Vec<u8>,
    decompress: Decompress,
}

impl Default for ZlibStream {
    fn default() -> Self {
        Self::new()
    }
}

impl ZlibStream {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            decompress: Decompress::new(true),
        }
    }

    /// 新しい接続ではzlibのコンテキストを最初からやり直す
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.decompress.reset(true);
    }

    /// 受信したバイナリフレームを追加します。
    /// 終端に達していなければNone、達していれば展開した文字列を返します。
    pub fn push(&mut self, data: &[u8]) -> Result<Option<String>, GatewayError> {
        self.buffer.extend_from_slice(data);
        if !self.buffer.ends_with(&ZLIB_FLUSH_SUFFIX) {
            return Ok(None);
        }

        let mut out = Vec::with_capacity(self.buffer.len() * 4);
        let mut consumed = 0usize;

        loop {
            if out.len() == out.capacity() {
                out.reserve(out.capacity().max(1024));
            }

            let before_in = self.decompress.total_in();
            let before_out = self.decompress.total_out();
            let status = self
                .decompress
                .decompress_vec(&self.buffer[consumed..], &mut out, FlushDecompress::Sync)?;
            let read = (self.decompress.total_in() - before_in) as usize;
            let written = self.decompress.total_out() - before_out;
            consumed += read;

            if status == Status::StreamEnd {
                break;
            }
            // 入力を使い切り、出力に余裕が残っていれば全て吐き出している
            if consumed >= self.buffer.len() && out.len() < out.capacity() {
                break;
            }
            if read == 0 && written == 0 && out.len() < out.capacity() {
                break;
            }
        }

        self.buffer.clear();
        Ok(Some(String::from_utf8(out)?))
    }
}
