//! Hand-declared bindings to a subset of `librknnrt.so`'s C ABI, loaded
//! dynamically through `libloading` rather than linked at build time
//! (the library is only present on the target NPU device, never on a
//! development host).

use std::ffi::c_void;
use std::os::raw::{c_char, c_int};

use libloading::{Library, Symbol};

use crate::error::RknnBackendError;

pub type RknnContext = u64;
pub const RKNN_SUCC: c_int = 0;
pub const RKNN_MAX_NAME_LEN: usize = 256;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct RknnInput {
    pub index: u32,
    pub buf: *mut c_void,
    pub size: u32,
    pub pass_through: u8,
    pub type_: c_int,
    pub fmt: c_int,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct RknnOutput {
    pub want_float: u8,
    pub is_prealloc: u8,
    pub index: u32,
    pub buf: *mut c_void,
    pub size: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct RknnInputOutputNum {
    pub n_input: u32,
    pub n_output: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct RknnTensorAttr {
    pub index: u32,
    pub n_dims: u32,
    pub dims: [u32; 16],
    pub name: [c_char; RKNN_MAX_NAME_LEN],
    pub n_elems: u32,
    pub size: u32,
    pub fmt: c_int,
    pub type_: c_int,
    pub qnt_type: c_int,
    pub fl: i8,
    pub zp: i32,
    pub scale: f32,
}

pub const RKNN_QUERY_IN_OUT_NUM: c_int = 0;
pub const RKNN_QUERY_INPUT_ATTR: c_int = 1;
pub const RKNN_QUERY_OUTPUT_ATTR: c_int = 2;

type RknnInitFn = unsafe extern "C" fn(*mut RknnContext, *mut c_void, u32, u32, *mut c_void) -> c_int;
type RknnDestroyFn = unsafe extern "C" fn(RknnContext) -> c_int;
type RknnQueryFn = unsafe extern "C" fn(RknnContext, c_int, *mut c_void, u32) -> c_int;
type RknnInputsSetFn = unsafe extern "C" fn(RknnContext, u32, *mut RknnInput) -> c_int;
type RknnRunFn = unsafe extern "C" fn(RknnContext, *mut c_void) -> c_int;
type RknnOutputsGetFn = unsafe extern "C" fn(RknnContext, u32, *mut RknnOutput, *mut c_void) -> c_int;

/// Owns the loaded shared library and resolved symbol pointers. Kept
/// alive for the lifetime of the backend; every rknn context created
/// through it must be destroyed before it is dropped.
pub struct RknnLibrary {
    _lib: Library,
    init: RknnInitFn,
    destroy: RknnDestroyFn,
    query: RknnQueryFn,
    inputs_set: RknnInputsSetFn,
    run: RknnRunFn,
    outputs_get: RknnOutputsGetFn,
}

// SAFETY: every resolved symbol is a plain C function pointer with no
// thread affinity, and `librknnrt.so` is documented as safe to call from
// multiple threads against distinct contexts.
unsafe impl Send for RknnLibrary {}
unsafe impl Sync for RknnLibrary {}

impl RknnLibrary {
    pub fn load(path: &str) -> Result<Self, RknnBackendError> {
        unsafe {
            let lib = Library::new(path).map_err(|source| RknnBackendError::LoadLibrary { source })?;
            let init: Symbol<RknnInitFn> = lib
                .get(b"rknn_init\0")
                .map_err(|source| RknnBackendError::LoadLibrary { source })?;
            let destroy: Symbol<RknnDestroyFn> = lib
                .get(b"rknn_destroy\0")
                .map_err(|source| RknnBackendError::LoadLibrary { source })?;
            let query: Symbol<RknnQueryFn> = lib
                .get(b"rknn_query\0")
                .map_err(|source| RknnBackendError::LoadLibrary { source })?;
            let inputs_set: Symbol<RknnInputsSetFn> = lib
                .get(b"rknn_inputs_set\0")
                .map_err(|source| RknnBackendError::LoadLibrary { source })?;
            let run: Symbol<RknnRunFn> = lib
                .get(b"rknn_run\0")
                .map_err(|source| RknnBackendError::LoadLibrary { source })?;
            let outputs_get: Symbol<RknnOutputsGetFn> = lib
                .get(b"rknn_outputs_get\0")
                .map_err(|source| RknnBackendError::LoadLibrary { source })?;

            let init = *init;
            let destroy = *destroy;
            let query = *query;
            let inputs_set = *inputs_set;
            let run = *run;
            let outputs_get = *outputs_get;

            Ok(Self {
                _lib: lib,
                init,
                destroy,
                query,
                inputs_set,
                run,
                outputs_get,
            })
        }
    }

    pub fn init(&self, model_data: &mut [u8]) -> Result<RknnContext, c_int> {
        let mut ctx: RknnContext = 0;
        let code = unsafe {
            (self.init)(
                &mut ctx,
                model_data.as_mut_ptr() as *mut c_void,
                model_data.len() as u32,
                0,
                std::ptr::null_mut(),
            )
        };
        if code == RKNN_SUCC {
            Ok(ctx)
        } else {
            Err(code)
        }
    }

    pub fn destroy(&self, ctx: RknnContext) -> c_int {
        unsafe { (self.destroy)(ctx) }
    }

    pub fn query_io_num(&self, ctx: RknnContext) -> Result<RknnInputOutputNum, c_int> {
        let mut io_num = RknnInputOutputNum { n_input: 0, n_output: 0 };
        let code = unsafe {
            (self.query)(
                ctx,
                RKNN_QUERY_IN_OUT_NUM,
                &mut io_num as *mut _ as *mut c_void,
                std::mem::size_of::<RknnInputOutputNum>() as u32,
            )
        };
        if code == RKNN_SUCC {
            Ok(io_num)
        } else {
            Err(code)
        }
    }

    pub fn query_tensor_attr(&self, ctx: RknnContext, query: c_int, index: u32) -> Result<RknnTensorAttr, c_int> {
        let mut attr = RknnTensorAttr {
            index,
            n_dims: 0,
            dims: [0; 16],
            name: [0; RKNN_MAX_NAME_LEN],
            n_elems: 0,
            size: 0,
            fmt: 0,
            type_: 0,
            qnt_type: 0,
            fl: 0,
            zp: 0,
            scale: 0.0,
        };
        let code = unsafe {
            (self.query)(
                ctx,
                query,
                &mut attr as *mut _ as *mut c_void,
                std::mem::size_of::<RknnTensorAttr>() as u32,
            )
        };
        if code == RKNN_SUCC {
            Ok(attr)
        } else {
            Err(code)
        }
    }

    pub fn inputs_set(&self, ctx: RknnContext, inputs: &mut [RknnInput]) -> c_int {
        unsafe { (self.inputs_set)(ctx, inputs.len() as u32, inputs.as_mut_ptr()) }
    }

    pub fn run(&self, ctx: RknnContext) -> c_int {
        unsafe { (self.run)(ctx, std::ptr::null_mut()) }
    }

    pub fn outputs_get(&self, ctx: RknnContext, outputs: &mut [RknnOutput]) -> c_int {
        unsafe { (self.outputs_get)(ctx, outputs.len() as u32, outputs.as_mut_ptr(), std::ptr::null_mut()) }
    }
}
