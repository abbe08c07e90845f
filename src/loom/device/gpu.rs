use std::{
    borrow::Cow,
    sync::{Arc, Mutex},
};

use rustc_hash::FxHashMap as HashMap;
use thiserror::Error;
use tokio::runtime::Handle;
use wgpu::util::DeviceExt;

use super::{DeviceError, DeviceId, DeviceInfo};
use crate::{
    hal::kernel::{self, KernelError, KernelKey, KernelSource, Method, VectorWidth},
    loom::{event::Event, num::DataType, platform},
};

/// A compiled kernel, ready to bind and dispatch.
#[derive(Debug, Clone)]
pub struct Kernel {
    pub key: KernelKey,
    pub pipeline: wgpu::ComputePipeline,
    pub layout: wgpu::BindGroupLayout,
}

/// One kernel launch: the kernel, its bound buffers and the workgroup counts.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub kernel: Kernel,
    pub bindings: wgpu::BindGroup,
    pub workgroups: [u32; 3],
}

/// Work recorded into one command buffer.
#[derive(Debug, Clone)]
pub enum Command {
    Dispatch(Dispatch),
    Copy {
        source: wgpu::Buffer,
        destination: wgpu::Buffer,
        size: u64,
    },
}

impl From<Dispatch> for Command {
    fn from(value: Dispatch) -> Self {
        Self::Dispatch(value)
    }
}

struct Context {
    device: wgpu::Device,
    queue: wgpu::Queue,
    runtime: Handle,
    info: DeviceInfo,
    features: wgpu::Features,
    /// Compiled kernels. Held locked while compiling, so a kernel is built at most once.
    kernels: Mutex<HashMap<KernelKey, Kernel>>,
}

/// Handle to the compute device, its queue and its compiled kernels.
///
/// Cloning is cheap and yields a handle to the same device.
#[derive(Clone)]
pub struct Gpu {
    id: uid::Id<DeviceId>,
    context: Arc<Context>,
}

impl std::fmt::Debug for Gpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gpu")
            .field("id", &self.id)
            .field("name", &self.context.info.name)
            .finish()
    }
}

impl PartialEq for Gpu {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Gpu {}

pub struct GpuBuilder {
    pub adapter: wgpu::Adapter,
    pub features: wgpu::Features,
    pub limits: wgpu::Limits,
    pub vector_width: VectorWidth,
}

#[derive(Debug, Error)]
pub enum GpuBuildError {
    #[error("no adapter with compute shader support found")]
    NoAdapter,
    #[error("failed to request device")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
    #[error("device must be built inside a tokio runtime")]
    Runtime(#[from] tokio::runtime::TryCurrentError),
}

/// Preference order of adapter types, lower first.
fn preference(device_type: wgpu::DeviceType) -> usize {
    match device_type {
        wgpu::DeviceType::DiscreteGpu => 0,
        wgpu::DeviceType::IntegratedGpu => 1,
        wgpu::DeviceType::VirtualGpu => 2,
        wgpu::DeviceType::Cpu => 3,
        wgpu::DeviceType::Other => 4,
    }
}

impl GpuBuilder {
    pub fn new(adapter: wgpu::Adapter) -> Self {
        let features = adapter.features() & wgpu::Features::SHADER_F16;
        let limits = adapter.limits();
        Self {
            adapter,
            features,
            limits,
            vector_width: Default::default(),
        }
    }

    /// Picks a GPU-class adapter, falling back to a CPU one.
    /// Adapters that can't run compute shaders are skipped.
    pub fn select(instance: &wgpu::Instance) -> Result<Self, GpuBuildError> {
        let adapter = instance
            .enumerate_adapters(wgpu::Backends::all())
            .into_iter()
            .filter(|adapter| {
                let flags = adapter.get_downlevel_capabilities().flags;
                flags.contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
            })
            .min_by_key(|adapter| preference(adapter.get_info().device_type))
            .ok_or(GpuBuildError::NoAdapter)?;

        let info = adapter.get_info();
        log::info!("selected adapter {} ({:?})", info.name, info.device_type);
        Ok(Self::new(adapter))
    }

    pub async fn build(self) -> Result<Gpu, GpuBuildError> {
        let Self {
            adapter,
            features,
            limits,
            vector_width,
        } = self;
        let runtime = Handle::try_current()?;
        let info = DeviceInfo::new(adapter.get_info(), &limits, features, vector_width);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: None,
                required_features: features,
                required_limits: limits,
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await?;
        device.on_uncaptured_error(Box::new(|err| log::error!("device error: {err}")));
        log::info!("created device: {info}");

        let kernels = Mutex::new(HashMap::default());
        let context = Context {
            device,
            queue,
            runtime,
            info,
            features,
            kernels,
        };
        let id = uid::Id::new();
        let context = Arc::new(context);
        Ok(Gpu { id, context })
    }

    pub fn limits(mut self, limits: wgpu::Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn features(mut self, features: wgpu::Features) -> Self {
        self.features = features;
        self
    }

    pub fn vector_width(mut self, vector_width: VectorWidth) -> Self {
        self.vector_width = vector_width;
        self
    }
}

impl Gpu {
    /// Selects an adapter with default settings and creates the device on it.
    pub async fn initialize() -> Result<Self, GpuBuildError> {
        let instance = wgpu::Instance::new(&Default::default());
        GpuBuilder::select(&instance)?.build().await
    }

    #[inline]
    pub fn id(&self) -> uid::Id<DeviceId> {
        self.id
    }

    #[inline]
    pub fn device(&self) -> &wgpu::Device {
        &self.context.device
    }

    #[inline]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.context.queue
    }

    #[inline]
    pub fn info(&self) -> &DeviceInfo {
        &self.context.info
    }

    #[inline]
    pub fn vector_width(&self) -> VectorWidth {
        self.context.info.vector_width
    }

    /// Returns the kernel of `method` for elements of `data_type`, compiling it on first use.
    pub fn kernel(&self, method: Method, data_type: DataType) -> Result<Kernel, KernelError> {
        let key = KernelKey::new(method, data_type, self.vector_width());
        if data_type == DataType::F16 && !self.context.features.contains(wgpu::Features::SHADER_F16)
        {
            return Err(KernelError::Unsupported(key));
        }

        let kernels = self.context.kernels.lock().expect("failed to lock");
        if let Some(kernel) = kernels.get(&key) {
            return Ok(kernel.clone());
        }
        drop(kernels);

        let source = kernel::generate(key)?;
        self.compile_and_cache(source)
    }

    /// Compiles `source` unless a kernel with its key is cached already.
    ///
    /// Failures are logged with the compiler output and not cached, so they only affect
    /// this kernel.
    pub fn compile_and_cache(&self, source: KernelSource) -> Result<Kernel, KernelError> {
        let mut kernels = self.context.kernels.lock().expect("failed to lock");
        if let Some(kernel) = kernels.get(&source.key) {
            return Ok(kernel.clone());
        }
        let kernel = self
            .compile(&source)
            .inspect_err(|err| log::error!("{err}"))?;
        kernels.insert(source.key, kernel.clone());
        Ok(kernel)
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip_all, fields(key = %source.key)))]
    fn compile(&self, source: &KernelSource) -> Result<Kernel, KernelError> {
        let key = source.key;
        source.compile()?;

        let device = &self.context.device;
        let label = key.to_string();
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&label),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(&source.source)),
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(&label),
            layout: None,
            module: &module,
            entry_point: Some(source.entry()),
            compilation_options: Default::default(),
            cache: None,
        });
        let layout = pipeline.get_bind_group_layout(0);
        log::debug!("compiled kernel {key}");

        Ok(Kernel {
            key,
            pipeline,
            layout,
        })
    }

    /// Binds `buffers` to the kernel in binding order.
    pub fn dispatch(
        &self,
        kernel: Kernel,
        buffers: &[&wgpu::Buffer],
        workgroups: [u32; 3],
    ) -> Dispatch {
        let entries: Vec<_> = buffers
            .iter()
            .enumerate()
            .map(|(index, buffer)| wgpu::BindGroupEntry {
                binding: index as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        let bindings = self
            .context
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: None,
                layout: &kernel.layout,
                entries: &entries,
            });
        Dispatch {
            kernel,
            bindings,
            workgroups,
        }
    }

    /// Workgroup counts covering `invocations` one-dimensional invocations.
    ///
    /// Counts beyond the per-dimension limit spill into `y`; kernels recover the linear
    /// index from `num_workgroups`.
    pub fn linear_workgroups(&self, invocations: usize) -> [u32; 3] {
        let block = kernel::BLOCK as usize;
        let groups = invocations.div_ceil(block).max(1);
        let limit = (self.context.info.max_workgroups_per_dimension as usize).max(1);
        match groups <= limit {
            true => [groups as u32, 1, 1],
            false => [limit as u32, groups.div_ceil(limit) as u32, 1],
        }
    }

    /// Creates a storage buffer holding `contents`, padded to whole words.
    pub fn create_buffer_init(&self, contents: &[u8]) -> wgpu::Buffer {
        let contents = pad(contents);
        self.context
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: None,
                contents: &contents,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
            })
    }

    /// Creates a zeroed storage buffer of at least `size` bytes.
    pub fn create_buffer(&self, size: usize) -> wgpu::Buffer {
        self.context.device.create_buffer(&wgpu::BufferDescriptor {
            label: None,
            size: padded_size(size) as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        })
    }

    /// Creates a uniform buffer holding `contents`.
    pub fn create_uniform(&self, contents: &[u8]) -> wgpu::Buffer {
        self.context
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: None,
                contents,
                usage: wgpu::BufferUsages::UNIFORM,
            })
    }

    /// Enqueues `commands` to run after every event in `wait`.
    ///
    /// Returns at once. The returned event resolves when the device has finished the work,
    /// or fails if any event in `wait` failed, in which case the work never runs.
    pub fn submit(&self, wait: Vec<Event>, commands: Vec<Command>) -> Event {
        let (sender, event) = Event::pending();
        let context = self.context.clone();
        let id = event.id();

        let future = async move {
            if let Err(err) = Event::wait_all(wait).await {
                log::error!("operation {id:?} skipped: {err}");
                _ = sender.send(Err(err));
                return;
            }

            let buffer = encode(&context.device, commands);
            context.queue.submit(Some(buffer));
            context.queue.on_submitted_work_done(move || {
                _ = sender.send(Ok(()));
            });
            platform::poll(&context.runtime, context.device.clone());
        };
        #[cfg(feature = "trace")]
        let future = tracing::Instrument::instrument(future, tracing::trace_span!("submit"));

        platform::spawn(&self.context.runtime, future);
        event
    }

    /// Waits for `wait`, then downloads the whole of `buffer`.
    pub async fn read(&self, wait: Vec<Event>, buffer: wgpu::Buffer) -> Result<Vec<u8>, DeviceError> {
        Event::wait_all(wait).await?;

        let context = &self.context;
        let (sender, receiver) = flume::bounded(1);
        wgpu::util::DownloadBuffer::read_buffer(
            &context.device,
            &context.queue,
            &buffer.slice(..),
            move |data| {
                let data = data
                    .map(|data| data.to_vec())
                    .map_err(DeviceError::from);
                _ = sender.send(data)
            },
        );
        platform::poll(&context.runtime, context.device.clone());
        receiver.recv_async().await?
    }
}

#[inline]
fn padded_size(size: usize) -> usize {
    size.div_ceil(4).max(1) * 4
}

fn pad(contents: &[u8]) -> Cow<'_, [u8]> {
    match contents.len() == padded_size(contents.len()) {
        true => Cow::Borrowed(contents),
        false => {
            let mut padded = contents.to_vec();
            padded.resize(padded_size(contents.len()), 0);
            Cow::Owned(padded)
        }
    }
}

fn encode(device: &wgpu::Device, commands: Vec<Command>) -> wgpu::CommandBuffer {
    let mut encoder = device.create_command_encoder(&Default::default());
    for command in commands {
        match command {
            Command::Dispatch(dispatch) => {
                let mut pass = encoder.begin_compute_pass(&Default::default());
                pass.set_pipeline(&dispatch.kernel.pipeline);
                pass.set_bind_group(0, &dispatch.bindings, &[]);
                let [x, y, z] = dispatch.workgroups;
                pass.dispatch_workgroups(x, y, z);
            }
            Command::Copy {
                source,
                destination,
                size,
            } => encoder.copy_buffer_to_buffer(&source, 0, &destination, 0, size),
        }
    }
    encoder.finish()
}

#[cfg(test)]
pub(crate) mod tests {
    use std::error::Error;

    use super::{Gpu, GpuBuilder, padded_size};
    use crate::{
        hal::kernel::{KernelError, KernelKey, KernelSource, Method, VectorWidth},
        loom::num::DataType,
    };

    /// Builds a device, or returns `None` if the machine has no usable adapter.
    pub async fn gpu(vector_width: VectorWidth) -> Option<Gpu> {
        let instance = wgpu::Instance::new(&Default::default());
        let builder = match GpuBuilder::select(&instance) {
            Ok(builder) => builder,
            Err(err) => {
                eprintln!("skipping device test: {err}");
                return None;
            }
        };
        builder.vector_width(vector_width).build().await.ok()
    }

    #[test]
    fn test_padded_size() {
        assert_eq!(padded_size(0), 4);
        assert_eq!(padded_size(6), 8);
        assert_eq!(padded_size(8), 8);
    }

    #[tokio::test]
    async fn test_kernel_cache() -> Result<(), Box<dyn Error>> {
        let Some(gpu) = gpu(VectorWidth::W4).await else {
            return Ok(());
        };
        println!("{}", gpu.info());

        let a = gpu.kernel(Method::TensorAdd, DataType::F32)?;
        let b = gpu.kernel(Method::TensorAdd, DataType::F32)?;
        assert_eq!(a.key, b.key);
        assert_eq!(gpu.context.kernels.lock().unwrap().len(), 1);

        // an unsupported method fails alone and leaves the cache usable
        assert!(matches!(
            gpu.kernel(Method::Negative, DataType::U32),
            Err(KernelError::Unsupported(_))
        ));
        gpu.kernel(Method::TensorMult, DataType::I32)?;
        assert_eq!(gpu.context.kernels.lock().unwrap().len(), 2);

        // a broken source reports the compiler log without poisoning other kernels
        let key = KernelKey::new(Method::Positive, DataType::I32, VectorWidth::W4);
        let source = KernelSource {
            key,
            source: "fn positive() -> u32 { return 1.0; }".into(),
        };
        match gpu.compile_and_cache(source) {
            Err(KernelError::Compile { log, .. }) => assert!(!log.is_empty()),
            other => panic!("unexpected result: {other:?}"),
        }
        gpu.kernel(Method::Positive, DataType::F32)?;
        assert_eq!(gpu.context.kernels.lock().unwrap().len(), 3);

        assert_eq!(gpu.linear_workgroups(1), [1, 1, 1]);
        assert_eq!(gpu.linear_workgroups(129), [3, 1, 1]);
        Ok(())
    }
}
