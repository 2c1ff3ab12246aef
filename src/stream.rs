//! Lazy, single-pass decoders over a response body.
//!
//! Every stream produced here reads the body forward exactly once. A stream
//! cannot be restarted; a second decode needs a second request. Cancelling the
//! token stops the stream between elements: it yields one
//! [`HttpUtilError::Cancelled`] and ends, never a partially decoded element.

use std::any::{Any, TypeId};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use encoding_rs::{Decoder, Encoding};
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::{HttpUtilError, Result};

pub(crate) type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Transform applied to every text chunk; returning `None` skips the chunk.
pub type Replacer = Arc<dyn Fn(String) -> Option<String> + Send + Sync>;

const DEFAULT_BLOCK_SIZE: usize = 8;
const DEFAULT_BYTES_SIZE: usize = 8192;

/// Incremental text view of a byte stream.
///
/// Consumed text is skipped through `pos` and only compacted when the next
/// chunk is decoded, so reads never shift the unread remainder.
pub struct TextReader {
    bytes: ByteStream,
    decoder: Decoder,
    text: String,
    pos: usize,
    eof: bool,
}

impl TextReader {
    pub(crate) fn new(bytes: ByteStream, encoding: &'static Encoding) -> Self {
        Self {
            bytes,
            decoder: encoding.new_decoder(),
            text: String::new(),
            pos: 0,
            eof: false,
        }
    }

    fn unread(&self) -> &str {
        &self.text[self.pos..]
    }

    fn take(&mut self, len: usize) -> String {
        let taken = self.text[self.pos..self.pos + len].to_owned();
        self.pos += len;
        taken
    }

    fn take_rest(&mut self) -> String {
        let rest = self.unread().to_owned();
        self.text.clear();
        self.pos = 0;
        rest
    }

    /// Pulls one more chunk from the body. Returns `false` at end of body.
    async fn fill(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }
        let chunk = self.bytes.next().await.transpose()?;
        self.compact();
        match chunk {
            Some(chunk) => {
                self.decode(&chunk, false);
                Ok(true)
            }
            None => {
                self.decode(&[], true);
                self.eof = true;
                Ok(false)
            }
        }
    }

    fn compact(&mut self) {
        if self.pos > 0 {
            self.text.drain(..self.pos);
            self.pos = 0;
        }
    }

    fn decode(&mut self, chunk: &[u8], last: bool) {
        let needed = self
            .decoder
            .max_utf8_buffer_length(chunk.len())
            .unwrap_or(chunk.len() * 3 + 16);
        self.text.reserve(needed);
        let (_, _, _) = self.decoder.decode_to_string(chunk, &mut self.text, last);
    }

    /// `true` once the body is exhausted and all decoded text was consumed.
    pub async fn at_end(&mut self) -> Result<bool> {
        while self.unread().is_empty() {
            if !self.fill().await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Reads up to the next `\n` (exclusive, a trailing `\r` is dropped).
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        let mut searched = 0;
        loop {
            if let Some(index) = self.unread()[searched..].find('\n') {
                let mut line = self.take(searched + index + 1);
                line.pop();
                if line.ends_with('\r') {
                    line.pop();
                }
                return Ok(Some(line));
            }
            searched = self.unread().len();
            if !self.fill().await? {
                if self.unread().is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.take_rest()));
            }
        }
    }

    /// Reads exactly `size` characters, or fewer at end of body.
    pub async fn read_block(&mut self, size: usize) -> Result<String> {
        loop {
            if let Some((index, _)) = self.unread().char_indices().nth(size) {
                return Ok(self.take(index));
            }
            if !self.fill().await? {
                return Ok(self.take_rest());
            }
        }
    }
}

/// Strategy that reads one text chunk per call.
#[async_trait]
pub trait ChunkReader: Send {
    /// Reads the next chunk. `Ok(None)` skips it; the body is not yet exhausted
    /// when this is called.
    async fn read_chunk(&mut self, reader: &mut TextReader) -> Result<Option<String>>;
}

/// Reads newline-delimited chunks.
#[derive(Clone, Default)]
pub struct LineReader {
    ignore_empty_lines: bool,
    replacer: Option<Replacer>,
}

impl LineReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ignore_empty_lines(mut self, ignore: bool) -> Self {
        self.ignore_empty_lines = ignore;
        self
    }

    pub fn replacer(mut self, replacer: impl Fn(String) -> Option<String> + Send + Sync + 'static) -> Self {
        self.replacer = Some(Arc::new(replacer));
        self
    }
}

#[async_trait]
impl ChunkReader for LineReader {
    async fn read_chunk(&mut self, reader: &mut TextReader) -> Result<Option<String>> {
        let line = reader.read_line().await?;
        let line = match (&self.replacer, line) {
            (Some(replacer), Some(line)) => replacer(line),
            (_, line) => line,
        };
        Ok(line.filter(|line| !(self.ignore_empty_lines && line.trim().is_empty())))
    }
}

/// Reads fixed-size character blocks.
#[derive(Clone)]
pub struct BlockReader {
    size: usize,
    replacer: Option<Replacer>,
}

impl Default for BlockReader {
    fn default() -> Self {
        Self {
            size: DEFAULT_BLOCK_SIZE,
            replacer: None,
        }
    }
}

impl BlockReader {
    /// Block of `size` characters; `size` must be at least 1.
    pub fn new(size: usize) -> Result<Self> {
        if size < 1 {
            return Err(HttpUtilError::out_of_range("size", "must be at least 1"));
        }
        Ok(Self {
            size,
            replacer: None,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn replacer(mut self, replacer: impl Fn(String) -> Option<String> + Send + Sync + 'static) -> Self {
        self.replacer = Some(Arc::new(replacer));
        self
    }
}

#[async_trait]
impl ChunkReader for BlockReader {
    async fn read_chunk(&mut self, reader: &mut TextReader) -> Result<Option<String>> {
        let block = reader.read_block(self.size).await?;
        if block.is_empty() {
            return Ok(None);
        }
        Ok(match &self.replacer {
            Some(replacer) => replacer(block),
            None => Some(block),
        })
    }
}

/// Size of the raw byte buffers yielded by a bytes stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BytesReader {
    size: usize,
}

impl Default for BytesReader {
    fn default() -> Self {
        Self {
            size: DEFAULT_BYTES_SIZE,
        }
    }
}

impl BytesReader {
    pub fn new(size: usize) -> Result<Self> {
        if size < 1 {
            return Err(HttpUtilError::out_of_range("size", "must be at least 1"));
        }
        Ok(Self { size })
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

/// Runs `fetch` unless the token fires first.
async fn cancellable<F, T>(token: &CancellationToken, fetch: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(HttpUtilError::Cancelled),
        result = fetch => result,
    }
}

/// Text chunks pass through unchanged for `String`, others are JSON-decoded.
fn decode_chunk<T: DeserializeOwned + 'static>(data: String) -> Result<T> {
    if TypeId::of::<T>() == TypeId::of::<String>() {
        let boxed: Box<dyn Any> = Box::new(data);
        return boxed
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| HttpUtilError::Decode("text chunk type mismatch".to_owned()));
    }
    Ok(serde_json::from_str(&data)?)
}

/// Decodes each chunk produced by `reader` into `T`.
pub(crate) fn chunk_stream<T, R>(
    bytes: ByteStream,
    encoding: &'static Encoding,
    reader: R,
    token: CancellationToken,
) -> BoxStream<'static, Result<T>>
where
    T: DeserializeOwned + Send + 'static,
    R: ChunkReader + 'static,
{
    let state = Some((TextReader::new(bytes, encoding), reader, token));
    stream::unfold(state, |state| async move {
        let (mut text, mut reader, token) = state?;
        if token.is_cancelled() {
            return Some((Err(HttpUtilError::Cancelled), None));
        }
        loop {
            let next = cancellable(&token, async {
                if text.at_end().await? {
                    return Ok(None);
                }
                reader.read_chunk(&mut text).await.map(Some)
            })
            .await;

            match next {
                Ok(None) => return None,
                Ok(Some(None)) => continue,
                Ok(Some(Some(data))) => {
                    return Some((decode_chunk::<T>(data), Some((text, reader, token))))
                }
                Err(err) => return Some((Err(err), None)),
            }
        }
    })
    .boxed()
}

/// Yields raw buffers of at most `reader.size()` bytes.
pub(crate) fn bytes_stream(
    bytes: ByteStream,
    reader: BytesReader,
    token: CancellationToken,
) -> BoxStream<'static, Result<Bytes>> {
    let state = Some((bytes, Bytes::new(), token));
    stream::unfold(state, move |state| async move {
        let (mut bytes, mut pending, token) = state?;
        if token.is_cancelled() {
            return Some((Err(HttpUtilError::Cancelled), None));
        }
        while pending.is_empty() {
            match cancellable(&token, async { bytes.next().await.transpose() }).await {
                Ok(Some(chunk)) => pending = chunk,
                Ok(None) => return None,
                Err(err) => return Some((Err(err), None)),
            }
        }
        let take = reader.size.min(pending.len());
        let chunk = pending.split_to(take);
        Some((Ok(chunk), Some((bytes, pending, token))))
    })
    .boxed()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ArrayState {
    BeforeArray,
    FirstElement,
    NextElement,
    Done,
}

enum Scan {
    NeedMore,
    Element(Bytes),
    End,
}

/// Incremental decoder for a top-level JSON array.
///
/// Elements are located by tracking nesting depth and string state, then
/// decoded individually as soon as their closing delimiter arrives.
#[derive(Debug)]
pub struct JsonArrayDecoder {
    buf: BytesMut,
    state: ArrayState,
    scan: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl Default for JsonArrayDecoder {
    fn default() -> Self {
        Self {
            buf: BytesMut::new(),
            state: ArrayState::BeforeArray,
            scan: 0,
            depth: 0,
            in_string: false,
            escaped: false,
        }
    }
}

impl JsonArrayDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    fn skip_whitespace(&mut self) {
        let skip = self
            .buf
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(self.buf.len());
        self.buf.advance(skip);
    }

    /// Decodes the next complete element, `Ok(None)` if more input is needed
    /// or the array is closed (see [`JsonArrayDecoder::is_done`]).
    pub fn next_element<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        match self.scan()? {
            Scan::Element(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Scan::NeedMore | Scan::End => Ok(None),
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == ArrayState::Done
    }

    fn scan(&mut self) -> Result<Scan> {
        loop {
            match self.state {
                ArrayState::Done => return Ok(Scan::End),
                ArrayState::BeforeArray => {
                    if self.buf.starts_with(&[0xEF, 0xBB, 0xBF]) {
                        self.buf.advance(3);
                    }
                    self.skip_whitespace();
                    match self.buf.first() {
                        None => return Ok(Scan::NeedMore),
                        Some(b'[') => {
                            self.buf.advance(1);
                            self.state = ArrayState::FirstElement;
                        }
                        Some(_) => {
                            return Err(HttpUtilError::Decode(
                                "expected a top-level JSON array".to_owned(),
                            ))
                        }
                    }
                }
                ArrayState::FirstElement | ArrayState::NextElement => {
                    if self.scan == 0 {
                        self.skip_whitespace();
                        match self.buf.first() {
                            None => return Ok(Scan::NeedMore),
                            Some(b']') if self.state == ArrayState::FirstElement => {
                                self.buf.advance(1);
                                self.state = ArrayState::Done;
                                return Ok(Scan::End);
                            }
                            Some(b',') | Some(b']') => {
                                return Err(HttpUtilError::Decode(
                                    "empty element in JSON array".to_owned(),
                                ))
                            }
                            Some(_) => {}
                        }
                    }
                    return self.scan_element();
                }
            }
        }
    }

    fn scan_element(&mut self) -> Result<Scan> {
        while self.scan < self.buf.len() {
            let byte = self.buf[self.scan];
            if self.in_string {
                match (self.escaped, byte) {
                    (true, _) => self.escaped = false,
                    (false, b'\\') => self.escaped = true,
                    (false, b'"') => self.in_string = false,
                    _ => {}
                }
                self.scan += 1;
                continue;
            }
            match byte {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' if self.depth > 0 => self.depth -= 1,
                b',' | b']' if self.depth == 0 => {
                    let raw = self.buf.split_to(self.scan).freeze();
                    self.buf.advance(1);
                    self.state = if byte == b',' {
                        ArrayState::NextElement
                    } else {
                        ArrayState::Done
                    };
                    self.scan = 0;
                    return Ok(Scan::Element(raw));
                }
                b'}' => {
                    return Err(HttpUtilError::Decode(
                        "unbalanced '}' in JSON array".to_owned(),
                    ))
                }
                _ => {}
            }
            self.scan += 1;
        }
        Ok(Scan::NeedMore)
    }
}

/// Streams the elements of a top-level JSON array body.
pub(crate) fn json_array_stream<T>(
    bytes: ByteStream,
    token: CancellationToken,
) -> BoxStream<'static, Result<T>>
where
    T: DeserializeOwned + Send + 'static,
{
    let state = Some((bytes, JsonArrayDecoder::new(), token));
    stream::unfold(state, |state| async move {
        let (mut bytes, mut decoder, token) = state?;
        if token.is_cancelled() {
            return Some((Err(HttpUtilError::Cancelled), None));
        }
        loop {
            match decoder.next_element::<T>() {
                Ok(Some(element)) => return Some((Ok(element), Some((bytes, decoder, token)))),
                Ok(None) if decoder.is_done() => return None,
                Ok(None) => {}
                Err(err) => return Some((Err(err), None)),
            }
            match cancellable(&token, async { bytes.next().await.transpose() }).await {
                Ok(Some(chunk)) => decoder.push(&chunk),
                Ok(None) => {
                    let err = HttpUtilError::Decode("unexpected end of JSON array".to_owned());
                    return Some((Err(err), None));
                }
                Err(err) => return Some((Err(err), None)),
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures_util::stream::{self, StreamExt};
    use serde::Deserialize;
    use tokio_util::sync::CancellationToken;

    use super::{
        bytes_stream, chunk_stream, json_array_stream, BlockReader, ByteStream, BytesReader,
        JsonArrayDecoder, LineReader, TextReader,
    };
    use crate::{HttpUtilError, Result};

    fn body(chunks: &[&str]) -> ByteStream {
        let chunks: Vec<Result<Bytes>> = chunks
            .iter()
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk.as_bytes())))
            .collect();
        stream::iter(chunks).boxed()
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        id: u32,
        name: String,
    }

    #[tokio::test]
    async fn json_array_yields_elements_across_chunk_boundaries() {
        let chunks = ["[{\"id\":1,\"na", "me\":\"a,]\"}", " , {\"id\":2,\"name\":\"b\\\"\"}", "]"];
        let items: Vec<Item> = json_array_stream::<Item>(body(&chunks), CancellationToken::new())
            .map(|item| item.expect("valid element"))
            .collect()
            .await;

        assert_eq!(
            items,
            vec![
                Item {
                    id: 1,
                    name: "a,]".to_owned()
                },
                Item {
                    id: 2,
                    name: "b\"".to_owned()
                },
            ]
        );
    }

    #[tokio::test]
    async fn json_array_of_scalars_and_nested_arrays() {
        let numbers: Vec<i32> = json_array_stream::<i32>(body(&["[1,", "2", "3 ,4]"]), CancellationToken::new())
            .map(|item| item.expect("number"))
            .collect()
            .await;
        assert_eq!(numbers, vec![1, 23, 4]);

        let nested: Vec<Vec<u8>> = json_array_stream::<Vec<u8>>(body(&["[[1,2],[]", ",[3]]"]), CancellationToken::new())
            .map(|item| item.expect("array"))
            .collect()
            .await;
        assert_eq!(nested, vec![vec![1, 2], vec![], vec![3]]);
    }

    #[tokio::test]
    async fn json_array_keeps_nested_commas_inside_elements() {
        let body_text = format!(
            "[{}]",
            (0..2000)
                .map(|id| format!("{{\"id\":{id},\"name\":\"n{id}\",\"tags\":[1,2,{{\"k\":[3,4]}}]}}"))
                .collect::<Vec<_>>()
                .join(",")
        );
        let values: Vec<serde_json::Value> =
            json_array_stream::<serde_json::Value>(body(&[body_text.as_str()]), CancellationToken::new())
                .map(|value| value.expect("valid element"))
                .collect()
                .await;

        assert_eq!(values.len(), 2000);
        assert_eq!(values[0]["name"], "n0");
        assert_eq!(values[1999]["id"], 1999);
        assert_eq!(values[7]["tags"][2]["k"][1], 4);
    }

    #[test]
    fn json_array_decoder_consumes_without_copying_the_tail() {
        let mut decoder = JsonArrayDecoder::new();
        decoder.push(b"[{\"a\":1,\"b\":2},{\"a\":3,\"b\":4}]");
        let first: serde_json::Value = decoder
            .next_element()
            .expect("valid element")
            .expect("complete element");
        assert_eq!(first["b"], 2);
        assert_eq!(&decoder.buf[..], b"{\"a\":3,\"b\":4}]");

        let second: serde_json::Value = decoder
            .next_element()
            .expect("valid element")
            .expect("complete element");
        assert_eq!(second["a"], 3);
        assert!(decoder.is_done());
    }

    #[tokio::test]
    async fn json_array_empty_and_truncated() {
        let empty: Vec<Result<i32>> = json_array_stream::<i32>(body(&[" [ ] "]), CancellationToken::new())
            .collect()
            .await;
        assert!(empty.is_empty());

        let truncated: Vec<Result<i32>> = json_array_stream::<i32>(body(&["[1,2"]), CancellationToken::new())
            .collect()
            .await;
        assert_eq!(truncated.len(), 2);
        assert_eq!(*truncated[0].as_ref().expect("first element"), 1);
        assert!(matches!(truncated[1], Err(HttpUtilError::Decode(_))));
    }

    #[test]
    fn json_array_rejects_non_array_documents() {
        let mut decoder = JsonArrayDecoder::new();
        decoder.push(b"{\"a\":1}");
        assert!(decoder.next_element::<i32>().is_err());
    }

    #[tokio::test]
    async fn cancelled_stream_yields_cancelled_then_ends() {
        let token = CancellationToken::new();
        token.cancel();
        let items: Vec<Result<i32>> = json_array_stream::<i32>(body(&["[1,2]"]), token).collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(HttpUtilError::Cancelled)));
    }

    #[tokio::test]
    async fn line_reader_skips_blank_lines_and_applies_replacer() {
        let reader = LineReader::new()
            .ignore_empty_lines(true)
            .replacer(|line| Some(line.trim_start_matches("data: ").to_owned()));
        let lines: Vec<String> = chunk_stream::<String, _>(
            body(&["data: a\r\n\r\nda", "ta: b\n", "data: c"]),
            encoding_rs::UTF_8,
            reader,
            CancellationToken::new(),
        )
        .map(|line| line.expect("line"))
        .collect()
        .await;
        assert_eq!(lines, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn line_reader_decodes_json_lines() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Tick {
            #[serde(rename = "C")]
            c: u32,
        }

        let ticks: Vec<Tick> = chunk_stream::<Tick, _>(
            body(&["{\"C\":1}\n{\"C\"", ":2}\n\n"]),
            encoding_rs::UTF_8,
            LineReader::new().ignore_empty_lines(true),
            CancellationToken::new(),
        )
        .map(|tick| tick.expect("tick"))
        .collect()
        .await;
        assert_eq!(ticks, vec![Tick { c: 1 }, Tick { c: 2 }]);
    }

    #[tokio::test]
    async fn block_reader_splits_on_characters() {
        let blocks: Vec<String> = chunk_stream::<String, _>(
            body(&["[1,2,3,4,", "5,6]", "é"]),
            encoding_rs::UTF_8,
            BlockReader::new(4).expect("valid size"),
            CancellationToken::new(),
        )
        .map(|block| block.expect("block"))
        .collect()
        .await;
        assert_eq!(blocks, vec!["[1,2", ",3,4", ",5,6", "]é"]);
        assert!(BlockReader::new(0).is_err());
    }

    #[tokio::test]
    async fn text_reader_handles_split_utf8_sequences() {
        let chunks: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from_static(&[0xC3])),
            Ok(Bytes::from_static(&[0xA9, b'\n'])),
        ];
        let lines: Vec<String> = chunk_stream::<String, _>(
            stream::iter(chunks).boxed(),
            encoding_rs::UTF_8,
            LineReader::new(),
            CancellationToken::new(),
        )
        .map(|line| line.expect("line"))
        .collect()
        .await;
        assert_eq!(lines, vec!["é"]);
    }

    #[tokio::test]
    async fn text_reader_advances_an_offset_over_buffered_text() {
        let body_text: String = (0..1000).map(|i| format!("line {i}\n")).collect();
        let mut reader = TextReader::new(body(&[body_text.as_str()]), encoding_rs::UTF_8);

        assert_eq!(reader.read_line().await.expect("line").as_deref(), Some("line 0"));
        assert_eq!(reader.read_line().await.expect("line").as_deref(), Some("line 1"));
        assert_eq!(reader.text.len(), body_text.len());
        assert_eq!(reader.pos, "line 0\nline 1\n".len());

        let mut count = 2;
        while reader.read_line().await.expect("line").is_some() {
            count += 1;
        }
        assert_eq!(count, 1000);
        assert!(reader.at_end().await.expect("end"));
    }

    #[tokio::test]
    async fn bytes_reader_rechunks_to_size() {
        let chunks: Vec<Bytes> = bytes_stream(
            body(&["abcdefg", "hi"]),
            BytesReader::new(3).expect("valid size"),
            CancellationToken::new(),
        )
        .map(|chunk| chunk.expect("chunk"))
        .collect()
        .await;
        assert_eq!(
            chunks,
            ["abc", "def", "g", "hi"]
                .map(|chunk| Bytes::from_static(chunk.as_bytes()))
                .to_vec()
        );
        assert_eq!(BytesReader::default().size(), 8192);
    }
}
